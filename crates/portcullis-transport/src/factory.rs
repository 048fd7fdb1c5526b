//! The tokio socket factory.

use crate::tcp::TokioTcpSocket;
use crate::udp::TokioUdpSocket;
use portcullis_relay::{
    AsyncPacketSocket, PacketSocketFactory, ProxyInfo, ProxyType, SocketEvent, SocketId,
};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc;

/// A [`PacketSocketFactory`] backed by tokio sockets.
///
/// Every socket this factory creates reports its events into one shared
/// channel; the receiver half is handed back from [`TokioSocketFactory::new`]
/// and is what a driver loop feeds into the port. Sockets spawn their I/O
/// tasks on the ambient tokio runtime, so the factory must be used from
/// within one.
///
/// TLS-wrapped sockets and proxy traversal are not provided; requests for
/// either fail with [`io::ErrorKind::Unsupported`], which the port handles
/// as a normal server failover.
pub struct TokioSocketFactory {
    events: mpsc::UnboundedSender<SocketEvent>,
    next_id: u64,
}

impl TokioSocketFactory {
    /// Create the factory and the socket event stream its sockets feed.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                next_id: 0,
            },
            event_rx,
        )
    }

    fn next_id(&mut self) -> SocketId {
        self.next_id += 1;
        SocketId(self.next_id)
    }
}

impl PacketSocketFactory for TokioSocketFactory {
    fn create_udp_socket(
        &mut self,
        bind_ip: IpAddr,
        min_port: u16,
        max_port: u16,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        let id = self.next_id();
        let socket =
            TokioUdpSocket::create(id, bind_ip, min_port, max_port, self.events.clone())?;
        Ok(Box::new(socket))
    }

    fn create_client_tcp_socket(
        &mut self,
        bind_ip: IpAddr,
        remote: SocketAddr,
        proxy: &ProxyInfo,
        _user_agent: &str,
        tls: bool,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        if tls {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "tls client sockets require an embedder-provided factory",
            ));
        }
        if proxy.kind != ProxyType::None {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "proxy traversal requires an embedder-provided factory",
            ));
        }
        let id = self.next_id();
        let socket = TokioTcpSocket::create(id, bind_ip, remote, self.events.clone());
        Ok(Box::new(socket))
    }
}
