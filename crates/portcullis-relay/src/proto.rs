//! Transport protocol descriptors and port-wide socket options.

use std::fmt;
use std::net::SocketAddr;

/// Transport used to reach a relay server.
///
/// The ordering reflects preference: UDP over TCP over TLS-wrapped TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolType {
    /// Plain datagrams
    Udp,
    /// Framed TCP stream
    Tcp,
    /// TLS-over-TCP, typically on port 443 to traverse HTTPS-only proxies
    SslTcp,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
            Self::SslTcp => write!(f, "ssltcp"),
        }
    }
}

/// A relay server endpoint: one address reachable over one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolAddress {
    /// Server socket address
    pub address: SocketAddr,
    /// Transport protocol
    pub proto: ProtocolType,
}

impl ProtocolAddress {
    /// Create a new protocol address.
    #[must_use]
    pub fn new(address: SocketAddr, proto: ProtocolType) -> Self {
        Self { address, proto }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.proto, self.address)
    }
}

/// Proxy categories relevant to server ordering and TCP socket creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyType {
    /// Direct connectivity
    #[default]
    None,
    /// HTTPS (CONNECT) proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
    /// Proxy detected but of unknown kind
    Unknown,
}

/// Proxy configuration handed to the socket factory for TCP connects.
#[derive(Debug, Clone, Default)]
pub struct ProxyInfo {
    /// Proxy kind
    pub kind: ProxyType,
    /// Proxy endpoint, when one is configured
    pub address: Option<SocketAddr>,
}

/// Socket options a port applies to every socket it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// SO_RCVBUF
    ReceiveBuffer,
    /// SO_SNDBUF
    SendBuffer,
    /// TCP_NODELAY
    NoDelay,
    /// Disable IP fragmentation
    DontFragment,
}

/// A recorded socket option assignment, replayed onto future sockets.
pub type OptionValue = (SocketOption, i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(ProtocolType::Udp.to_string(), "udp");
        assert_eq!(ProtocolType::Tcp.to_string(), "tcp");
        assert_eq!(ProtocolType::SslTcp.to_string(), "ssltcp");
    }

    #[test]
    fn test_protocol_preference_order() {
        assert!(ProtocolType::Udp < ProtocolType::Tcp);
        assert!(ProtocolType::Tcp < ProtocolType::SslTcp);
    }

    #[test]
    fn test_protocol_address_display() {
        let pa = ProtocolAddress::new("10.0.0.1:3478".parse().unwrap(), ProtocolType::Udp);
        assert_eq!(pa.to_string(), "udp://10.0.0.1:3478");
    }
}
