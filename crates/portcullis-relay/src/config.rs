//! Relay port configuration.

use crate::proto::ProxyInfo;
use std::net::{IpAddr, Ipv4Addr};

/// Static configuration for one [`crate::RelayPort`].
///
/// Timing behavior (keep-alive cadence, retry windows, soft connect
/// timeout) is fixed by protocol constants and deliberately not
/// configurable here.
#[derive(Debug, Clone)]
pub struct RelayPortConfig {
    /// Local interface to bind relay sockets on
    pub bind_ip: IpAddr,
    /// Lowest local port to bind (0 for OS-assigned)
    pub min_port: u16,
    /// Highest local port to bind (0 for OS-assigned)
    pub max_port: u16,
    /// ICE username fragment carried in Allocate and Send requests
    pub username_fragment: String,
    /// Proxy configuration for TCP connects; also reorders SSLTCP servers
    pub proxy: ProxyInfo,
    /// User agent string handed to the socket factory for proxy traversal
    pub user_agent: String,
}

impl RelayPortConfig {
    /// Create a configuration with an OS-assigned port range, no proxy,
    /// and an empty user agent.
    #[must_use]
    pub fn new(bind_ip: IpAddr, username_fragment: impl Into<String>) -> Self {
        Self {
            bind_ip,
            min_port: 0,
            max_port: 0,
            username_fragment: username_fragment.into(),
            proxy: ProxyInfo::default(),
            user_agent: String::new(),
        }
    }

    /// Restrict local sockets to the inclusive port range.
    #[must_use]
    pub fn with_port_range(mut self, min_port: u16, max_port: u16) -> Self {
        self.min_port = min_port;
        self.max_port = max_port;
        self
    }

    /// Set the proxy configuration.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyInfo) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set the user agent used for proxied TCP connects.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl Default for RelayPortConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ProxyType;

    #[test]
    fn test_builder_chain() {
        let config = RelayPortConfig::new("10.0.0.5".parse().unwrap(), "ufrag")
            .with_port_range(40000, 40100)
            .with_proxy(ProxyInfo {
                kind: ProxyType::Https,
                address: Some("10.0.0.1:8080".parse().unwrap()),
            })
            .with_user_agent("portcullis/0.1");

        assert_eq!(config.min_port, 40000);
        assert_eq!(config.max_port, 40100);
        assert_eq!(config.proxy.kind, ProxyType::Https);
        assert_eq!(config.user_agent, "portcullis/0.1");
    }

    #[test]
    fn test_default_is_unbound() {
        let config = RelayPortConfig::default();
        assert_eq!(config.min_port, 0);
        assert_eq!(config.max_port, 0);
        assert!(config.username_fragment.is_empty());
    }
}
