//! Tokio-backed UDP packet sockets.

use crate::AbortOnDrop;
use portcullis_relay::{AsyncPacketSocket, SocketEvent, SocketId, SocketOption};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;

/// Bind a non-blocking UDP socket on `bind_ip` within the inclusive port
/// range; `0..=0` lets the OS pick.
pub(crate) fn bind_in_range(
    bind_ip: IpAddr,
    min_port: u16,
    max_port: u16,
) -> io::Result<std::net::UdpSocket> {
    if min_port == 0 && max_port == 0 {
        let socket = std::net::UdpSocket::bind((bind_ip, 0))?;
        socket.set_nonblocking(true)?;
        return Ok(socket);
    }
    for port in min_port..=max_port {
        match std::net::UdpSocket::bind((bind_ip, port)) {
            Ok(socket) => {
                socket.set_nonblocking(true)?;
                return Ok(socket);
            }
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no local port available in the configured range",
    ))
}

pub(crate) struct TokioUdpSocket {
    id: SocketId,
    socket: Arc<UdpSocket>,
    // A second OS handle to the same socket, kept for option setting.
    sockopt_handle: std::net::UdpSocket,
    _reader: AbortOnDrop,
}

impl TokioUdpSocket {
    pub(crate) fn create(
        id: SocketId,
        bind_ip: IpAddr,
        min_port: u16,
        max_port: u16,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> io::Result<Self> {
        let std_socket = bind_in_range(bind_ip, min_port, max_port)?;
        let sockopt_handle = std_socket.try_clone()?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);
        let reader = tokio::spawn(run_reader(socket.clone(), id, events));
        Ok(Self {
            id,
            socket,
            sockopt_handle,
            _reader: AbortOnDrop(reader),
        })
    }
}

impl AsyncPacketSocket for TokioUdpSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_to(&mut self, data: &[u8], remote: SocketAddr) -> io::Result<usize> {
        self.socket.try_send_to(data, remote)
    }

    fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        let socket = socket2::SockRef::from(&self.sockopt_handle);
        match option {
            SocketOption::ReceiveBuffer => socket.set_recv_buffer_size(value as usize),
            SocketOption::SendBuffer => socket.set_send_buffer_size(value as usize),
            SocketOption::NoDelay | SocketOption::DontFragment => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "option not supported on udp sockets",
            )),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

async fn run_reader(
    socket: Arc<UdpSocket>,
    id: SocketId,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let mut buf = vec![0u8; 65536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, remote)) => {
                let event = SocketEvent::ReadPacket {
                    socket: id,
                    data: buf[..n].to_vec(),
                    remote,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(%err, "udp receive failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_in_range_respects_range() {
        let socket = bind_in_range("127.0.0.1".parse().unwrap(), 42000, 42020).unwrap();
        let port = socket.local_addr().unwrap().port();
        assert!((42000..=42020).contains(&port));
    }

    #[test]
    fn test_bind_in_range_os_assigned() {
        let socket = bind_in_range("127.0.0.1".parse().unwrap(), 0, 0).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_in_range_exhausted() {
        let first = bind_in_range("127.0.0.1".parse().unwrap(), 42100, 42100).unwrap();
        let err = bind_in_range("127.0.0.1".parse().unwrap(), 42100, 42100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        drop(first);
    }
}
