//! Tokio-backed client TCP packet sockets.
//!
//! The relay speaks packets over streams by prefixing each packet with a
//! 2-byte big-endian length. One task per socket owns the stream: it
//! connects, reports the connect/close transitions, frames writes queued
//! by the port, and unframes inbound bytes into packet events.

use crate::AbortOnDrop;
use portcullis_relay::{AsyncPacketSocket, SocketEvent, SocketId, SocketOption};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::warn;

pub(crate) enum TcpCommand {
    Send(Vec<u8>),
    SetNoDelay(bool),
}

pub(crate) struct TokioTcpSocket {
    id: SocketId,
    remote: SocketAddr,
    commands: mpsc::UnboundedSender<TcpCommand>,
    _task: AbortOnDrop,
}

impl TokioTcpSocket {
    pub(crate) fn create(
        id: SocketId,
        bind_ip: IpAddr,
        remote: SocketAddr,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(bind_ip, remote, id, events, command_rx));
        Self {
            id,
            remote,
            commands,
            _task: AbortOnDrop(task),
        }
    }
}

impl AsyncPacketSocket for TokioTcpSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_to(&mut self, data: &[u8], _remote: SocketAddr) -> io::Result<usize> {
        if data.len() > usize::from(u16::MAX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "packet exceeds the stream framing limit",
            ));
        }
        self.commands
            .send(TcpCommand::Send(data.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection task gone"))?;
        Ok(data.len())
    }

    fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        match option {
            SocketOption::NoDelay => self
                .commands
                .send(TcpCommand::SetNoDelay(value != 0))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection task gone")),
            SocketOption::ReceiveBuffer
            | SocketOption::SendBuffer
            | SocketOption::DontFragment => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "option not supported on tcp sockets",
            )),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

async fn connect(bind_ip: IpAddr, remote: SocketAddr) -> io::Result<TcpStream> {
    let socket = match bind_ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(bind_ip, 0))?;
    socket.connect(remote).await
}

async fn run_connection(
    bind_ip: IpAddr,
    remote: SocketAddr,
    id: SocketId,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<TcpCommand>,
) {
    let mut stream = match connect(bind_ip, remote).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send(SocketEvent::Closed {
                socket: id,
                error: Some(err),
            });
            return;
        }
    };
    let _ = events.send(SocketEvent::Connected { socket: id });

    let mut inbound: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                // The socket handle was dropped; the connection goes with it.
                None => break,
                Some(TcpCommand::SetNoDelay(value)) => {
                    if let Err(err) = stream.set_nodelay(value) {
                        warn!(%err, "failed to set nodelay");
                    }
                }
                Some(TcpCommand::Send(frame)) => {
                    let mut framed = Vec::with_capacity(2 + frame.len());
                    framed.extend_from_slice(&(frame.len() as u16).to_be_bytes());
                    framed.extend_from_slice(&frame);
                    if let Err(err) = stream.write_all(&framed).await {
                        let _ = events.send(SocketEvent::Closed {
                            socket: id,
                            error: Some(err),
                        });
                        break;
                    }
                }
            },
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    let _ = events.send(SocketEvent::Closed {
                        socket: id,
                        error: None,
                    });
                    break;
                }
                Ok(n) => {
                    inbound.extend_from_slice(&chunk[..n]);
                    deliver_frames(&mut inbound, id, remote, &events);
                }
                Err(err) => {
                    let _ = events.send(SocketEvent::Closed {
                        socket: id,
                        error: Some(err),
                    });
                    break;
                }
            },
        }
    }
}

/// Pull every complete length-prefixed frame out of `inbound`.
fn deliver_frames(
    inbound: &mut Vec<u8>,
    id: SocketId,
    remote: SocketAddr,
    events: &mpsc::UnboundedSender<SocketEvent>,
) {
    while inbound.len() >= 2 {
        let len = usize::from(u16::from_be_bytes([inbound[0], inbound[1]]));
        if inbound.len() < 2 + len {
            break;
        }
        let data = inbound[2..2 + len].to_vec();
        inbound.drain(..2 + len);
        let _ = events.send(SocketEvent::ReadPacket {
            socket: id,
            data,
            remote,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_frames_handles_partials() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote: SocketAddr = "10.0.0.1:3478".parse().unwrap();
        let mut inbound = Vec::new();

        // Two frames arriving split across reads.
        inbound.extend_from_slice(&[0, 3, b'a', b'b']);
        deliver_frames(&mut inbound, SocketId(1), remote, &tx);
        assert!(rx.try_recv().is_err(), "incomplete frame stays buffered");

        inbound.extend_from_slice(&[b'c', 0, 1, b'z']);
        deliver_frames(&mut inbound, SocketId(1), remote, &tx);

        match rx.try_recv().unwrap() {
            SocketEvent::ReadPacket { data, .. } => assert_eq!(data, b"abc"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SocketEvent::ReadPacket { data, .. } => assert_eq!(data, b"z"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(inbound.is_empty());
    }
}
