//! Socket and factory traits the embedder implements for real I/O.
//!
//! The port never performs I/O directly: it writes through
//! [`AsyncPacketSocket`] handles its factory creates, and consumes
//! [`SocketEvent`]s the embedder routes back in. All sockets are
//! packet-oriented; stream transports are expected to frame packets
//! internally (the tokio adapter uses a 2-byte length prefix).

use crate::proto::{ProxyInfo, SocketOption};
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Identifies one socket for event routing.
///
/// Factories assign unique IDs so that late events from a disposed socket
/// are distinguishable from the entry's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

/// A non-blocking packet socket handle.
///
/// Dropping the handle closes the socket and stops event delivery for it.
pub trait AsyncPacketSocket {
    /// The factory-assigned identity of this socket.
    fn id(&self) -> SocketId;

    /// Write one packet toward `remote`.
    ///
    /// # Errors
    ///
    /// Returns the socket's error; the port records the kind and surfaces
    /// it from `send_to`.
    fn send_to(&mut self, data: &[u8], remote: SocketAddr) -> io::Result<usize>;

    /// Apply a socket option.
    ///
    /// # Errors
    ///
    /// Returns an error when the option is unsupported on this transport.
    fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()>;

    /// The locally bound address, if known.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// The connected remote address, for client stream sockets.
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Creates sockets on behalf of the port.
///
/// Creation is synchronous; connection establishment for stream sockets is
/// reported later through [`SocketEvent::Connected`].
pub trait PacketSocketFactory {
    /// Create an unconnected UDP socket bound to `bind_ip` within the
    /// inclusive local port range (`0..=0` for OS-assigned).
    ///
    /// # Errors
    ///
    /// Returns an error when no socket can be bound; the port treats this
    /// as a failover step, not a fatal condition.
    fn create_udp_socket(
        &mut self,
        bind_ip: IpAddr,
        min_port: u16,
        max_port: u16,
    ) -> io::Result<Box<dyn AsyncPacketSocket>>;

    /// Create a client TCP socket to `remote`, optionally TLS-wrapped,
    /// traversing the configured proxy with the given user agent.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be created (including
    /// transports this factory does not provide); the port fails over.
    fn create_client_tcp_socket(
        &mut self,
        bind_ip: IpAddr,
        remote: SocketAddr,
        proxy: &ProxyInfo,
        user_agent: &str,
        tls: bool,
    ) -> io::Result<Box<dyn AsyncPacketSocket>>;
}

/// Socket events the embedder feeds into the port.
#[derive(Debug)]
pub enum SocketEvent {
    /// One packet arrived.
    ReadPacket {
        /// Receiving socket
        socket: SocketId,
        /// Packet bytes
        data: Vec<u8>,
        /// Sender address
        remote: SocketAddr,
    },
    /// A client stream socket finished connecting.
    Connected {
        /// The socket that connected
        socket: SocketId,
    },
    /// A stream socket closed or failed.
    Closed {
        /// The socket that closed
        socket: SocketId,
        /// The error that closed it, if any
        error: Option<io::Error>,
    },
}
