//! Per-destination relay entries and their server connections.
//!
//! An entry is one logical tunnel from this port to one external peer. It
//! drives the server/protocol failover loop, owns the current connection,
//! refreshes the allocation, and wraps or unwraps payload on the data path.

use crate::allocate::AllocateRequest;
use crate::event::PortEvent;
use crate::port::PortCore;
use crate::proto::{ProtocolAddress, ProtocolType, SocketOption};
use crate::socket::{AsyncPacketSocket, SocketId};
use crate::timer::{EntryId, TimerMessage};
use portcullis_stun::{
    ManagerEvent, MessageType, ResponseKind, StunAddress, StunAttribute, StunMessage,
    StunRequestManager, TURN_MAGIC_COOKIE,
};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between keep-alive Allocate requests on a healthy connection.
pub const KEEP_ALIVE_DELAY: Duration = Duration::from_secs(10 * 60);

/// Overall window during which allocate error responses are retried,
/// matching the ICE gathering timeout.
pub const RETRY_TIMEOUT: Duration = crate::allocate::ALLOCATE_RETRY_TIMEOUT;

/// How long to wait for a stream socket to connect before trying the next
/// server, ahead of the OS-level connect timeout.
pub const SOFT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether the framing sentinel appears at byte offset 24, i.e. immediately
/// after the 20-byte header and the first 4-byte attribute header.
///
/// Only valid while the server writes the cookie as the first attribute of
/// every framed message; an attribute reordering on the server side would
/// defeat this check.
pub(crate) fn has_magic_cookie(data: &[u8]) -> bool {
    data.len() >= 24 + TURN_MAGIC_COOKIE.len() && data[24..28] == TURN_MAGIC_COOKIE
}

/// One active socket to one server address over one protocol.
///
/// Owns the socket and the allocate transaction table; both are released
/// together when the connection is dropped, cancelling any outstanding
/// transactions without surfacing further events.
pub(crate) struct RelayConnection {
    protocol_address: ProtocolAddress,
    socket: Box<dyn AsyncPacketSocket>,
    requests: StunRequestManager<AllocateRequest>,
}

impl RelayConnection {
    pub(crate) fn new(protocol_address: ProtocolAddress, socket: Box<dyn AsyncPacketSocket>) -> Self {
        Self {
            protocol_address,
            socket,
            requests: StunRequestManager::new(),
        }
    }

    pub(crate) fn socket_id(&self) -> SocketId {
        self.socket.id()
    }

    pub(crate) fn protocol_address(&self) -> &ProtocolAddress {
        &self.protocol_address
    }

    pub(crate) fn remote_addr(&self) -> Option<SocketAddr> {
        self.socket.remote_addr()
    }

    /// Raw write to the server.
    pub(crate) fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send_to(data, self.protocol_address.address)
    }

    pub(crate) fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        self.socket.set_option(option, value)
    }

    /// Enqueue an allocate transaction; a zero delay transmits on the next
    /// processing pass.
    pub(crate) fn send_allocate_request(
        &mut self,
        request: AllocateRequest,
        delay: Duration,
        now: Instant,
    ) {
        self.requests.send_delayed(request, delay, now);
    }

    pub(crate) fn check_response(
        &mut self,
        message: &StunMessage,
    ) -> Option<(AllocateRequest, ResponseKind)> {
        self.requests.check_response(message)
    }

    pub(crate) fn poll_requests(&mut self, now: Instant) -> Vec<ManagerEvent<AllocateRequest>> {
        self.requests.poll(now)
    }

    pub(crate) fn next_request_deadline(&self) -> Option<Instant> {
        self.requests.next_deadline()
    }
}

/// Observable lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No connection attempt yet
    Idle,
    /// A server attempt is in flight
    Connecting,
    /// An Allocate response has been seen on the current connection
    Connected,
    /// The server acknowledged destination locking; payload may flow
    /// unframed
    Locked,
    /// Every configured server has been tried without success
    Exhausted,
}

/// One logical tunnel for one external destination.
pub(crate) struct RelayEntry {
    id: EntryId,
    ext_addr: Option<SocketAddr>,
    server_index: usize,
    connected: bool,
    locked: bool,
    exhausted: bool,
    current_connection: Option<RelayConnection>,
}

impl RelayEntry {
    pub(crate) fn new(id: EntryId, ext_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            ext_addr,
            server_index: 0,
            connected: false,
            locked: false,
            exhausted: false,
            current_connection: None,
        }
    }

    pub(crate) fn ext_addr(&self) -> Option<SocketAddr> {
        self.ext_addr
    }

    pub(crate) fn set_ext_addr(&mut self, addr: SocketAddr) {
        self.ext_addr = Some(addr);
    }

    pub(crate) fn connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn server_index(&self) -> usize {
        self.server_index
    }

    pub(crate) fn set_server_index(&mut self, index: usize) {
        self.server_index = index;
    }

    pub(crate) fn current_socket_id(&self) -> Option<SocketId> {
        self.current_connection.as_ref().map(RelayConnection::socket_id)
    }

    pub(crate) fn state(&self) -> EntryState {
        if self.exhausted {
            EntryState::Exhausted
        } else if self.locked {
            EntryState::Locked
        } else if self.connected {
            EntryState::Connected
        } else if self.current_connection.is_some() {
            EntryState::Connecting
        } else {
            EntryState::Idle
        }
    }

    /// Start (or continue) connecting to the server list. Idempotent once
    /// connected; transitions to exhausted when the list runs out.
    pub(crate) fn connect(&mut self, core: &mut PortCore, now: Instant) {
        if self.connected {
            return;
        }

        let Some(server) = core.server_address(self.server_index) else {
            warn!("no more relay addresses left to try");
            self.exhausted = true;
            return;
        };

        // The replaced connection may still have callbacks in flight;
        // release it on the next loop turn, not here.
        if let Some(old) = self.current_connection.take() {
            core.dispose(old);
        }

        info!(server = %server, "connecting to relay");

        let socket = match server.proto {
            ProtocolType::Udp => core.create_udp_socket(),
            ProtocolType::Tcp | ProtocolType::SslTcp => {
                core.create_client_tcp_socket(server.address, server.proto == ProtocolType::SslTcp)
            }
        };

        let socket = match socket {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%err, server = %server, "relay socket creation failed");
                // Failover is always driven from the message loop.
                core.timers.post(now, TimerMessage::ConnectTimeout(self.id));
                return;
            }
        };

        let mut connection = RelayConnection::new(server, socket);
        for &(option, value) in core.options() {
            if let Err(err) = connection.set_option(option, value) {
                debug!(%err, ?option, "socket option not applied");
            }
        }

        match server.proto {
            ProtocolType::Udp => {
                // A datagram socket is usable the moment it exists.
                let request = AllocateRequest::new(core.username_bytes(), now);
                connection.send_allocate_request(request, Duration::ZERO, now);
            }
            ProtocolType::Tcp | ProtocolType::SslTcp => {
                core.timers.post_delayed(
                    now,
                    SOFT_CONNECT_TIMEOUT,
                    TimerMessage::ConnectTimeout(self.id),
                );
            }
        }

        self.current_connection = Some(connection);
    }

    /// The allocation on the current connection succeeded; publish the
    /// mapped address. The server relays everything as UDP on the public
    /// side, so the external address is always published as UDP.
    fn on_connect(&mut self, core: &mut PortCore, mapped: SocketAddr) {
        info!(%mapped, "relay allocate succeeded");
        self.connected = true;
        core.set_related_address(mapped);
        core.add_external_address(ProtocolAddress::new(mapped, ProtocolType::Udp));
        core.set_ready();
    }

    /// Send payload to `dest`, wrapping in a STUN Send request unless this
    /// entry is locked to that destination.
    ///
    /// Send requests use no transaction: a lost packet is simply lost and
    /// the application's next send retries. This keeps the data path
    /// stateless.
    pub(crate) fn send_to(
        &mut self,
        core: &PortCore,
        dest: SocketAddr,
        data: &[u8],
    ) -> io::Result<usize> {
        if self.locked && self.ext_addr == Some(dest) {
            return self.send_packet(data);
        }

        let Some(dest_attr) = StunAddress::from_socket_addr(dest) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "relay destinations must be IPv4",
            ));
        };

        let mut request = StunMessage::new(MessageType::SendRequest);
        request.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
        request.add_attribute(StunAttribute::Username(core.username_bytes()));
        request.add_attribute(StunAttribute::DestinationAddress(dest_attr));

        // Ask the server to pin this connection to its destination.
        if self.ext_addr == Some(dest) {
            request.add_attribute(StunAttribute::Options(0x1));
        }

        request.add_attribute(StunAttribute::Data(data.to_vec()));

        // TODO: compute the HMAC.

        self.send_packet(&request.encode())
    }

    fn send_packet(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.current_connection.as_mut() {
            Some(connection) => connection.send(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "relay entry has no connection",
            )),
        }
    }

    /// Enqueue a refresh Allocate on the current connection.
    pub(crate) fn schedule_keep_alive(&mut self, core: &PortCore, now: Instant) {
        if let Some(connection) = self.current_connection.as_mut() {
            let request = AllocateRequest::new(core.username_bytes(), now);
            connection.send_allocate_request(request, KEEP_ALIVE_DELAY, now);
        }
    }

    pub(crate) fn set_socket_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        match self.current_connection.as_mut() {
            Some(connection) => connection.set_option(option, value),
            None => Ok(()),
        }
    }

    /// Move on to the next server address.
    ///
    /// A non-nil socket that does not match the current connection is a
    /// late callback from a disposed attempt and is ignored.
    pub(crate) fn handle_connect_failure(
        &mut self,
        core: &mut PortCore,
        socket: Option<SocketId>,
        now: Instant,
    ) {
        if let Some(socket) = socket {
            if self.current_socket_id() != Some(socket) {
                return;
            }
        }

        if let Some(connection) = &self.current_connection {
            core.push_event(PortEvent::ConnectFailure(*connection.protocol_address()));
        }

        self.server_index += 1;
        self.connect(core, now);
    }

    /// Soft connect timer fired (or a zero-delay failover was requested).
    pub(crate) fn on_connect_timeout(&mut self, core: &mut PortCore, now: Instant) {
        if let Some(connection) = &self.current_connection {
            let server = *connection.protocol_address();
            warn!(server = %server, "relay connection timed out");
            core.push_event(PortEvent::SoftTimeout(server));
            let socket = connection.socket_id();
            self.handle_connect_failure(core, Some(socket), now);
        } else {
            self.handle_connect_failure(core, None, now);
        }
    }

    /// A stream socket finished connecting; start allocating.
    pub(crate) fn on_socket_connected(&mut self, core: &PortCore, now: Instant) {
        if let Some(connection) = self.current_connection.as_mut() {
            if let Some(remote) = connection.remote_addr() {
                info!(%remote, "relay tcp connected");
            }
            let request = AllocateRequest::new(core.username_bytes(), now);
            connection.send_allocate_request(request, Duration::ZERO, now);
        }
    }

    /// A stream socket closed or failed.
    pub(crate) fn on_socket_closed(
        &mut self,
        core: &mut PortCore,
        socket: SocketId,
        error: Option<io::Error>,
        now: Instant,
    ) {
        if let Some(err) = error {
            warn!(%err, "relay connection failed: socket closed");
        } else {
            warn!("relay connection failed: socket closed");
        }
        self.handle_connect_failure(core, Some(socket), now);
    }

    /// Demultiplex one inbound packet from the current connection's socket.
    pub(crate) fn on_read_packet(&mut self, core: &mut PortCore, data: &[u8], now: Instant) {
        if self.current_connection.is_none() {
            debug!("dropping packet: no current connection");
            return;
        }

        // Without the sentinel this is an unwrapped relayed payload; the
        // actual remote is the one this entry recorded. The server is only
        // allowed to skip framing once the entry is locked.
        if !has_magic_cookie(data) {
            match (self.locked, self.ext_addr) {
                (true, Some(ext_addr)) => {
                    core.deliver(data, ext_addr, ProtocolType::Udp);
                }
                _ => debug!("dropping unframed packet: entry not locked"),
            }
            return;
        }

        let message = match StunMessage::decode(data) {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, "incoming packet was not STUN");
                return;
            }
        };

        let outcome = self
            .current_connection
            .as_mut()
            .and_then(|connection| connection.check_response(&message));
        if let Some((request, kind)) = outcome {
            match kind {
                ResponseKind::Success => self.on_allocate_response(core, &message, now),
                ResponseKind::Error => self.on_allocate_error_response(core, &request, &message, now),
            }
            return;
        }

        match message.msg_type() {
            MessageType::SendResponse => {
                if let Some(options) = message.options() {
                    if options & 0x1 != 0 {
                        self.locked = true;
                    }
                }
            }
            MessageType::DataIndication => {
                let Some(source) = message.source_address2() else {
                    debug!("data indication has no source address");
                    return;
                };
                let Some(remote) = source.socket_addr() else {
                    debug!("source address has bad family");
                    return;
                };
                let Some(payload) = message.data() else {
                    debug!("data indication has no data");
                    return;
                };
                core.deliver(payload, remote, ProtocolType::Udp);
            }
            other => {
                debug!(msg_type = ?other, "unexpected stun type from server");
            }
        }
    }

    fn on_allocate_response(&mut self, core: &mut PortCore, message: &StunMessage, now: Instant) {
        match message.mapped_address() {
            None => debug!("allocate response missing mapped address"),
            Some(mapped) => match mapped.socket_addr() {
                None => debug!("mapped address has bad family"),
                Some(addr) => self.on_connect(core, addr),
            },
        }

        // Refresh the allocation regardless of whether the mapped address
        // was usable; a successful round trip means the path works.
        self.schedule_keep_alive(core, now);
    }

    fn on_allocate_error_response(
        &mut self,
        core: &mut PortCore,
        request: &AllocateRequest,
        message: &StunMessage,
        now: Instant,
    ) {
        match message.error_code() {
            None => debug!("allocate error response missing error code"),
            Some(error) => {
                info!(code = error.code, reason = %error.reason, "allocate error response");
            }
        }

        if request.within_retry_window(now) {
            self.schedule_keep_alive(core, now);
        }
    }

    /// Drive the allocate transaction table: write due transmissions to the
    /// socket and fail over on transaction timeout. Returns whether any
    /// work was done.
    pub(crate) fn pump_requests(&mut self, core: &mut PortCore, now: Instant) -> bool {
        let Some(connection) = self.current_connection.as_mut() else {
            return false;
        };
        let events = connection.poll_requests(now);
        if events.is_empty() {
            return false;
        }

        let socket = connection.socket_id();
        let mut timed_out = false;
        for event in events {
            match event {
                ManagerEvent::Transmit { bytes, .. } => {
                    if let Some(connection) = self.current_connection.as_mut() {
                        if let Err(err) = connection.send(&bytes) {
                            warn!(%err, "failed sending allocate request");
                        }
                    }
                }
                ManagerEvent::TimedOut(_) => {
                    info!("allocate request timed out");
                    timed_out = true;
                }
            }
        }

        if timed_out {
            self.handle_connect_failure(core, Some(socket), now);
        }
        true
    }

    pub(crate) fn next_request_deadline(&self) -> Option<Instant> {
        self.current_connection
            .as_ref()
            .and_then(RelayConnection::next_request_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_cookie_detection() {
        let mut message = StunMessage::new(MessageType::SendResponse);
        message.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
        assert!(has_magic_cookie(&message.encode()));
    }

    #[test]
    fn test_magic_cookie_requires_first_attribute() {
        let mut message = StunMessage::new(MessageType::SendResponse);
        message.add_attribute(StunAttribute::Username(b"abcd".to_vec()));
        message.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
        assert!(!has_magic_cookie(&message.encode()));
    }

    #[test]
    fn test_magic_cookie_short_input() {
        assert!(!has_magic_cookie(b"hi"));
        assert!(!has_magic_cookie(&[0u8; 27]));
    }

    #[test]
    fn test_new_entry_is_idle() {
        let entry = RelayEntry::new(EntryId(0), None);
        assert_eq!(entry.state(), EntryState::Idle);
        assert!(entry.ext_addr().is_none());
        assert!(!entry.connected());
    }
}
