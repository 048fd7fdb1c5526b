//! The relay port: gatherer facade over the entry state machines.

use crate::candidate::{Candidate, CandidateOrigin, CandidateType};
use crate::config::RelayPortConfig;
use crate::entry::{EntryState, RelayConnection, RelayEntry};
use crate::error::SendError;
use crate::event::PortEvent;
use crate::proto::{OptionValue, ProtocolAddress, ProtocolType, ProxyType, SocketOption};
use crate::socket::{AsyncPacketSocket, PacketSocketFactory, SocketEvent, SocketId};
use crate::timer::{EntryId, TimerMessage, TimerQueue};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::debug;

/// An ICE connection this port created for a remote candidate.
///
/// The relay port only records the pairing; packet flow stays on the port's
/// `send_to`/event surface.
#[derive(Debug, Clone)]
pub struct PortConnection {
    remote: Candidate,
    local_candidate: usize,
}

impl PortConnection {
    /// The remote candidate this connection was created for.
    #[must_use]
    pub fn remote(&self) -> &Candidate {
        &self.remote
    }

    /// Index into [`RelayPort::candidates`] of the matched local candidate.
    #[must_use]
    pub fn local_candidate_index(&self) -> usize {
        self.local_candidate
    }
}

/// Port state shared with the entries (the arena side of the design: the
/// port owns the entries; entries reach back through this struct instead of
/// holding owning references).
pub(crate) struct PortCore {
    config: RelayPortConfig,
    factory: Box<dyn PacketSocketFactory>,
    server_addresses: Vec<ProtocolAddress>,
    external_addresses: Vec<ProtocolAddress>,
    options: Vec<OptionValue>,
    candidates: Vec<Candidate>,
    connections: HashMap<SocketAddr, PortConnection>,
    related_address: Option<SocketAddr>,
    ready: bool,
    error: Option<io::ErrorKind>,
    pub(crate) timers: TimerQueue,
    events: VecDeque<PortEvent>,
    // Replaced connections parked until the next loop turn so in-flight
    // callbacks from their sockets still see a live object.
    graveyard: Vec<RelayConnection>,
}

impl PortCore {
    pub(crate) fn server_address(&self, index: usize) -> Option<ProtocolAddress> {
        self.server_addresses.get(index).copied()
    }

    pub(crate) fn options(&self) -> &[OptionValue] {
        &self.options
    }

    pub(crate) fn username_bytes(&self) -> Vec<u8> {
        self.config.username_fragment.as_bytes().to_vec()
    }

    pub(crate) fn dispose(&mut self, connection: RelayConnection) {
        self.graveyard.push(connection);
    }

    pub(crate) fn push_event(&mut self, event: PortEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn create_udp_socket(&mut self) -> io::Result<Box<dyn AsyncPacketSocket>> {
        self.factory.create_udp_socket(
            self.config.bind_ip,
            self.config.min_port,
            self.config.max_port,
        )
    }

    pub(crate) fn create_client_tcp_socket(
        &mut self,
        remote: SocketAddr,
        tls: bool,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        self.factory.create_client_tcp_socket(
            self.config.bind_ip,
            remote,
            &self.config.proxy,
            &self.config.user_agent,
            tls,
        )
    }

    pub(crate) fn set_related_address(&mut self, address: SocketAddr) {
        self.related_address = Some(address);
    }

    /// Record an external address, deduplicated by (address, protocol).
    pub(crate) fn add_external_address(&mut self, address: ProtocolAddress) {
        if self.external_addresses.contains(&address) {
            debug!(address = %address, "redundant relay address");
            return;
        }
        self.external_addresses.push(address);
    }

    /// Publish every external address as a relayed local candidate and
    /// signal readiness. Idempotent; the signal fires at most once.
    pub(crate) fn set_ready(&mut self) {
        if self.ready {
            return;
        }
        for address in &self.external_addresses {
            let candidate = Candidate::relay(address.address, Some(address.address), address.proto);
            self.candidates.push(candidate.clone());
            self.events.push_back(PortEvent::CandidateReady(candidate));
        }
        self.ready = true;
        self.events.push_back(PortEvent::AddressReady);
    }

    /// Deliver an inbound payload upward: straight to an existing ICE
    /// connection when one matches the remote, otherwise escalated for ICE
    /// demultiplexing.
    pub(crate) fn deliver(&mut self, data: &[u8], remote: SocketAddr, proto: ProtocolType) {
        let event = if self.connections.contains_key(&remote) {
            PortEvent::PeerPacket {
                remote,
                data: data.to_vec(),
                proto,
            }
        } else {
            PortEvent::UnmatchedPacket {
                remote,
                data: data.to_vec(),
                proto,
            }
        };
        self.events.push_back(event);
    }
}

/// The TURN-style relay port.
///
/// Owns the ordered server list, per-port socket options, and one entry per
/// tunneled destination (the primary entry exists from construction and
/// adopts the first payload destination). Sans-IO: the embedder feeds
/// [`SocketEvent`]s and timer ticks in, and drains [`PortEvent`]s out.
pub struct RelayPort {
    core: PortCore,
    entries: Vec<RelayEntry>,
}

impl RelayPort {
    /// Create a port with one nil-addressed primary entry. The port is not
    /// ready until [`RelayPort::prepare_address`] has been called and the
    /// primary allocation succeeds.
    #[must_use]
    pub fn new(config: RelayPortConfig, factory: Box<dyn PacketSocketFactory>) -> Self {
        Self {
            core: PortCore {
                config,
                factory,
                server_addresses: Vec::new(),
                external_addresses: Vec::new(),
                options: Vec::new(),
                candidates: Vec::new(),
                connections: HashMap::new(),
                related_address: None,
                ready: false,
                error: None,
                timers: TimerQueue::new(),
                events: VecDeque::new(),
                graveyard: Vec::new(),
            },
            entries: vec![RelayEntry::new(EntryId(0), None)],
        }
    }

    /// Append a relay server endpoint. SSLTCP endpoints are promoted to the
    /// front of the list when the configured proxy is HTTPS or unknown,
    /// since such proxies usually only allow port 443.
    pub fn add_server_address(&mut self, address: ProtocolAddress) {
        let promote = address.proto == ProtocolType::SslTcp
            && matches!(
                self.core.config.proxy.kind,
                ProxyType::Https | ProxyType::Unknown
            );
        if promote {
            self.core.server_addresses.insert(0, address);
        } else {
            self.core.server_addresses.push(address);
        }
    }

    /// Record an external address, deduplicated by (address, protocol).
    pub fn add_external_address(&mut self, address: ProtocolAddress) {
        self.core.add_external_address(address);
    }

    /// Start gathering: initiate the primary entry's connect. Call exactly
    /// once, before any other entries exist; the primary's allocation fills
    /// in this port's public address.
    pub fn prepare_address(&mut self, now: Instant) {
        debug_assert_eq!(self.entries.len(), 1);
        self.core.ready = false;
        {
            let Self { core, entries } = self;
            entries[0].connect(core, now);
        }
        self.run_ready(now);
    }

    /// Send payload (or wrapped control traffic) toward `dest`.
    ///
    /// Entry selection: a nil-addressed entry adopts `dest` when `payload`
    /// is true; otherwise the entry tunneling to `dest` is used; otherwise
    /// a new entry is created (payload only) and the primary stands in
    /// until it connects. Returns the user byte count, not the wire size.
    ///
    /// # Errors
    ///
    /// [`SendError::WouldBlock`] when no connected entry can take the
    /// packet yet, [`SendError::Socket`] when the write fails. Either way
    /// the error kind is retained for [`RelayPort::last_error`].
    pub fn send_to(
        &mut self,
        data: &[u8],
        dest: SocketAddr,
        payload: bool,
        now: Instant,
    ) -> Result<usize, SendError> {
        self.sweep();

        // The primary entry was created without an address, so it can bind
        // to the first payload destination that comes along.
        let mut chosen = None;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.ext_addr().is_none() && payload {
                entry.set_ext_addr(dest);
                chosen = Some(index);
                break;
            } else if entry.ext_addr() == Some(dest) {
                chosen = Some(index);
                break;
            }
        }

        // No entry for this destination: make one. It will not be usable
        // until it connects.
        if chosen.is_none() && payload {
            let id = EntryId(self.entries.len());
            let mut entry = RelayEntry::new(id, Some(dest));
            entry.set_server_index(self.entries[0].server_index());
            entry.connect(&mut self.core, now);
            self.entries.push(entry);
            chosen = Some(id.0);
        }

        // An unconnected (or missing) choice falls back to the primary.
        let mut index = chosen.unwrap_or(0);
        if !self.entries[index].connected() {
            index = 0;
            if !self.entries[index].connected() {
                self.core.error = Some(io::ErrorKind::WouldBlock);
                self.run_ready(now);
                return Err(SendError::WouldBlock);
            }
        }

        let result = {
            let Self { core, entries } = self;
            entries[index].send_to(core, dest, data)
        };
        let outcome = match result {
            Ok(_) => Ok(data.len()),
            Err(err) => {
                self.core.error = Some(err.kind());
                Err(SendError::Socket(err))
            }
        };
        self.run_ready(now);
        outcome
    }

    /// Feed one socket event in. Events from sockets that no longer belong
    /// to any entry's current connection are dropped.
    pub fn handle_socket_event(&mut self, event: SocketEvent, now: Instant) {
        self.sweep();
        match event {
            SocketEvent::ReadPacket {
                socket,
                data,
                remote: _remote,
            } => {
                if let Some(index) = self.entry_for_socket(socket) {
                    let Self { core, entries } = self;
                    entries[index].on_read_packet(core, &data, now);
                } else {
                    debug!("dropping packet: unknown socket");
                }
            }
            SocketEvent::Connected { socket } => {
                if let Some(index) = self.entry_for_socket(socket) {
                    let Self { core, entries } = self;
                    entries[index].on_socket_connected(core, now);
                }
            }
            SocketEvent::Closed { socket, error } => {
                if let Some(index) = self.entry_for_socket(socket) {
                    let Self { core, entries } = self;
                    entries[index].on_socket_closed(core, socket, error, now);
                }
            }
        }
        self.run_ready(now);
    }

    /// Process timer work due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.sweep();
        self.run_ready(now);
    }

    /// The next instant at which [`RelayPort::handle_timeout`] has work.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut deadline = self.core.timers.next_deadline();
        for entry in &self.entries {
            if let Some(due) = entry.next_request_deadline() {
                deadline = Some(match deadline {
                    None => due,
                    Some(current) => current.min(due),
                });
            }
        }
        deadline
    }

    /// Drain the next pending event, if any.
    pub fn poll_event(&mut self) -> Option<PortEvent> {
        self.core.events.pop_front()
    }

    /// Apply a socket option to every live connection and record it for
    /// every socket created later.
    ///
    /// # Errors
    ///
    /// Returns the first per-socket failure; the option is still recorded
    /// and applied wherever possible.
    pub fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        let mut first_error = None;
        for entry in &mut self.entries {
            if let Err(err) = entry.set_socket_option(option, value) {
                if first_error.is_none() {
                    self.core.error = Some(err.kind());
                    first_error = Some(err);
                }
            }
        }
        self.core.options.push((option, value));
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Create an ICE connection for a remote candidate.
    ///
    /// Refuses non-UDP remotes that were not initiated by this port,
    /// relay-to-relay loopback, and address-family mismatches.
    pub fn create_connection(
        &mut self,
        remote: Candidate,
        origin: CandidateOrigin,
    ) -> Option<&PortConnection> {
        if remote.protocol != ProtocolType::Udp && origin != CandidateOrigin::ThisPort {
            return None;
        }
        if remote.candidate_type == CandidateType::Relay {
            return None;
        }
        if remote.address.is_ipv4() != self.core.config.bind_ip.is_ipv4() {
            return None;
        }

        let local_candidate = self
            .core
            .candidates
            .iter()
            .position(|candidate| candidate.protocol == remote.protocol)
            .unwrap_or(0);

        let address = remote.address;
        self.core.connections.insert(
            address,
            PortConnection {
                remote,
                local_candidate,
            },
        );
        self.core.connections.get(&address)
    }

    /// Deliver an inbound payload the embedder received out of band.
    pub fn on_read_packet(&mut self, data: &[u8], remote: SocketAddr, proto: ProtocolType) {
        self.core.deliver(data, remote, proto);
    }

    /// Published local candidates (empty until ready).
    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.core.candidates
    }

    /// The mapped address reported by the relay server, once allocated.
    #[must_use]
    pub fn related_address(&self) -> Option<SocketAddr> {
        self.core.related_address
    }

    /// Whether the primary allocation has succeeded and candidates are
    /// published.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.core.ready
    }

    /// Kind of the most recent send failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<io::ErrorKind> {
        self.core.error
    }

    /// Number of entries, including the primary.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Lifecycle state of the entry at `index` (0 is the primary).
    #[must_use]
    pub fn entry_state(&self, index: usize) -> Option<EntryState> {
        self.entries.get(index).map(RelayEntry::state)
    }

    /// Destination the entry at `index` is tunneling to, if adopted.
    #[must_use]
    pub fn entry_destination(&self, index: usize) -> Option<SocketAddr> {
        self.entries.get(index).and_then(RelayEntry::ext_addr)
    }

    fn entry_for_socket(&self, socket: SocketId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.current_socket_id() == Some(socket))
    }

    /// Release connections replaced on earlier turns; late events for them
    /// were already discarded by the socket-identity guards.
    fn sweep(&mut self) {
        self.core.graveyard.clear();
    }

    /// Run every timer message and request transmission due at `now`.
    /// Zero-delay messages posted while processing run in the same pass,
    /// so synchronous socket-creation failures walk the whole server list
    /// without external ticks.
    fn run_ready(&mut self, now: Instant) {
        loop {
            let mut progressed = false;
            while let Some(message) = self.core.timers.pop_due(now) {
                progressed = true;
                match message {
                    TimerMessage::ConnectTimeout(id) => {
                        let Self { core, entries } = self;
                        entries[id.0].on_connect_timeout(core, now);
                    }
                }
            }
            for index in 0..self.entries.len() {
                let Self { core, entries } = self;
                progressed |= entries[index].pump_requests(core, now);
            }
            if !progressed {
                break;
            }
        }
    }
}
