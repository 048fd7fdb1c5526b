//! Integration tests for the relay port state machine.
//!
//! Everything runs against a fake socket factory and explicit instants; no
//! real sockets or sleeping. Server behavior is scripted by crafting the
//! response bytes a relay would send and feeding them back as socket
//! events.

use portcullis_relay::{
    AsyncPacketSocket, CandidateType, EntryState, PacketSocketFactory, PortEvent, ProtocolAddress,
    ProtocolType, ProxyInfo, RelayPort, RelayPortConfig, SendError, SocketEvent, SocketId,
    SocketOption, KEEP_ALIVE_DELAY,
};
use portcullis_stun::{
    ErrorCode, MessageType, StunAddress, StunAttribute, StunMessage, TURN_MAGIC_COOKIE,
};
use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct SocketLog {
    sent: Vec<Vec<u8>>,
    options: Vec<(SocketOption, i32)>,
}

struct FakeSocket {
    id: SocketId,
    remote: Option<SocketAddr>,
    log: Rc<RefCell<SocketLog>>,
}

impl AsyncPacketSocket for FakeSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_to(&mut self, data: &[u8], _remote: SocketAddr) -> io::Result<usize> {
        self.log.borrow_mut().sent.push(data.to_vec());
        Ok(data.len())
    }

    fn set_option(&mut self, option: SocketOption, value: i32) -> io::Result<()> {
        self.log.borrow_mut().options.push((option, value));
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some("192.168.1.10:50000".parse().unwrap())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}

struct CreatedSocket {
    id: SocketId,
    proto: ProtocolType,
    log: Rc<RefCell<SocketLog>>,
}

#[derive(Default)]
struct FactoryLog {
    next_id: u64,
    fail_all: bool,
    attempts: Vec<ProtocolType>,
    created: Vec<CreatedSocket>,
}

struct FakeFactory {
    log: Rc<RefCell<FactoryLog>>,
}

impl FakeFactory {
    fn new() -> (Self, Rc<RefCell<FactoryLog>>) {
        let log = Rc::new(RefCell::new(FactoryLog::default()));
        (Self { log: log.clone() }, log)
    }

    fn create(
        &mut self,
        proto: ProtocolType,
        remote: Option<SocketAddr>,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        let mut log = self.log.borrow_mut();
        log.attempts.push(proto);
        if log.fail_all {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "socket creation disabled",
            ));
        }
        log.next_id += 1;
        let id = SocketId(log.next_id);
        let socket_log = Rc::new(RefCell::new(SocketLog::default()));
        log.created.push(CreatedSocket {
            id,
            proto,
            log: socket_log.clone(),
        });
        Ok(Box::new(FakeSocket {
            id,
            remote,
            log: socket_log,
        }))
    }
}

impl PacketSocketFactory for FakeFactory {
    fn create_udp_socket(
        &mut self,
        _bind_ip: IpAddr,
        _min_port: u16,
        _max_port: u16,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        self.create(ProtocolType::Udp, None)
    }

    fn create_client_tcp_socket(
        &mut self,
        _bind_ip: IpAddr,
        remote: SocketAddr,
        _proxy: &ProxyInfo,
        _user_agent: &str,
        tls: bool,
    ) -> io::Result<Box<dyn AsyncPacketSocket>> {
        let proto = if tls {
            ProtocolType::SslTcp
        } else {
            ProtocolType::Tcp
        };
        self.create(proto, Some(remote))
    }
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup(servers: &[ProtocolAddress]) -> (RelayPort, Rc<RefCell<FactoryLog>>) {
    init_logs();
    let (factory, log) = FakeFactory::new();
    let config = RelayPortConfig::new("192.168.1.10".parse().unwrap(), "ufrag0001");
    let mut port = RelayPort::new(config, Box::new(factory));
    for server in servers {
        port.add_server_address(*server);
    }
    (port, log)
}

fn udp_server(addr: &str) -> ProtocolAddress {
    ProtocolAddress::new(addr.parse().unwrap(), ProtocolType::Udp)
}

fn tcp_server(addr: &str) -> ProtocolAddress {
    ProtocolAddress::new(addr.parse().unwrap(), ProtocolType::Tcp)
}

fn socket_at(log: &Rc<RefCell<FactoryLog>>, index: usize) -> (SocketId, Rc<RefCell<SocketLog>>) {
    let log = log.borrow();
    let created = &log.created[index];
    (created.id, created.log.clone())
}

fn sent_on(socket_log: &Rc<RefCell<SocketLog>>) -> Vec<Vec<u8>> {
    socket_log.borrow().sent.clone()
}

fn drain_events(port: &mut RelayPort) -> Vec<PortEvent> {
    std::iter::from_fn(|| port.poll_event()).collect()
}

/// The server's allocate success response: cookie first, then the mapping.
fn allocate_ok(request: &[u8], mapped: &str) -> Vec<u8> {
    let request = StunMessage::decode(request).expect("captured allocate parses");
    assert_eq!(request.msg_type(), MessageType::AllocateRequest);
    let mut response = StunMessage::new(MessageType::AllocateResponse)
        .with_transaction_id(*request.transaction_id());
    response.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
    response.add_attribute(StunAttribute::MappedAddress(
        StunAddress::from_socket_addr(mapped.parse().unwrap()).unwrap(),
    ));
    response.encode()
}

fn allocate_error(request: &[u8], code: u16) -> Vec<u8> {
    let request = StunMessage::decode(request).expect("captured allocate parses");
    let mut response = StunMessage::new(MessageType::AllocateErrorResponse)
        .with_transaction_id(*request.transaction_id());
    response.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
    response.add_attribute(StunAttribute::ErrorCode(ErrorCode {
        code,
        reason: "rejected".to_string(),
    }));
    response.encode()
}

fn send_response(options: u32) -> Vec<u8> {
    let mut response = StunMessage::new(MessageType::SendResponse);
    response.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
    response.add_attribute(StunAttribute::Options(options));
    response.encode()
}

fn data_indication(source: &str, payload: &[u8]) -> Vec<u8> {
    let mut indication = StunMessage::new(MessageType::DataIndication);
    indication.add_attribute(StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec()));
    indication.add_attribute(StunAttribute::SourceAddress2(
        StunAddress::from_socket_addr(source.parse().unwrap()).unwrap(),
    ));
    indication.add_attribute(StunAttribute::Data(payload.to_vec()));
    indication.encode()
}

fn read_packet(socket: SocketId, data: Vec<u8>) -> SocketEvent {
    SocketEvent::ReadPacket {
        socket,
        data,
        remote: "10.0.0.1:3478".parse().unwrap(),
    }
}

/// Brings a single-UDP-server port to the connected state. Returns the
/// socket handle and the instant of the allocate response.
fn connect_udp(port: &mut RelayPort, log: &Rc<RefCell<FactoryLog>>, t0: Instant) -> (SocketId, Rc<RefCell<SocketLog>>, Instant) {
    port.prepare_address(t0);
    let (socket, socket_log) = socket_at(log, 0);
    let sent = sent_on(&socket_log);
    assert_eq!(sent.len(), 1, "allocate goes out immediately on udp");

    let at = t0 + Duration::from_millis(30);
    port.handle_socket_event(
        read_packet(socket, allocate_ok(&sent[0], "198.51.100.7:40000")),
        at,
    );
    (socket, socket_log, at)
}

// S1: UDP happy path.
#[test]
fn udp_happy_path_publishes_candidate_and_schedules_keep_alive() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (socket, socket_log, responded_at) = connect_udp(&mut port, &log, t0);

    assert!(port.ready());
    assert_eq!(port.related_address(), Some("198.51.100.7:40000".parse().unwrap()));
    assert_eq!(port.entry_state(0), Some(EntryState::Connected));

    let events = drain_events(&mut port);
    let candidate = events
        .iter()
        .find_map(|e| match e {
            PortEvent::CandidateReady(c) => Some(c.clone()),
            _ => None,
        })
        .expect("candidate published");
    assert_eq!(candidate.address, "198.51.100.7:40000".parse().unwrap());
    assert_eq!(candidate.protocol, ProtocolType::Udp);
    assert_eq!(candidate.candidate_type, CandidateType::Relay);
    assert!(events.contains(&PortEvent::AddressReady));

    // The refresh allocate is enqueued one keep-alive interval out.
    assert_eq!(port.poll_timeout(), Some(responded_at + KEEP_ALIVE_DELAY));
    port.handle_timeout(responded_at + KEEP_ALIVE_DELAY);
    let sent = sent_on(&socket_log);
    assert_eq!(sent.len(), 2, "keep-alive allocate transmitted");
    let refresh = StunMessage::decode(&sent[1]).unwrap();
    assert_eq!(refresh.msg_type(), MessageType::AllocateRequest);

    // A refresh response keeps the port ready without re-signalling.
    port.handle_socket_event(
        read_packet(socket, allocate_ok(&sent[1], "198.51.100.7:40000")),
        responded_at + KEEP_ALIVE_DELAY + Duration::from_millis(30),
    );
    let events = drain_events(&mut port);
    assert!(!events.contains(&PortEvent::AddressReady), "ready fires once");
}

// S2: TCP soft timeout fails over to the next server.
#[test]
fn tcp_soft_timeout_fails_over_to_udp() {
    let servers = [tcp_server("10.0.0.1:3478"), udp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    let t0 = Instant::now();
    port.prepare_address(t0);

    // The TCP attempt sends nothing until connected; only the soft timer
    // is pending.
    let (_, tcp_log) = socket_at(&log, 0);
    assert!(sent_on(&tcp_log).is_empty());
    assert_eq!(port.poll_timeout(), Some(t0 + Duration::from_secs(3)));

    port.handle_timeout(t0 + Duration::from_secs(3));
    let events = drain_events(&mut port);
    assert!(events.contains(&PortEvent::SoftTimeout(servers[0])));
    assert!(events.contains(&PortEvent::ConnectFailure(servers[0])));

    // Second attempt is the UDP server; finish the allocation there.
    let (udp_socket, udp_log) = socket_at(&log, 1);
    {
        let log = log.borrow();
        assert_eq!(log.attempts, vec![ProtocolType::Tcp, ProtocolType::Udp]);
    }
    let sent = sent_on(&udp_log);
    assert_eq!(sent.len(), 1);
    port.handle_socket_event(
        read_packet(udp_socket, allocate_ok(&sent[0], "203.0.113.80:41000")),
        t0 + Duration::from_millis(3100),
    );

    assert!(port.ready());
    assert_eq!(
        port.candidates()[0].address,
        "203.0.113.80:41000".parse::<SocketAddr>().unwrap()
    );
}

#[test]
fn tcp_connect_signal_starts_allocation() {
    let (mut port, log) = setup(&[tcp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    port.prepare_address(t0);

    let (socket, socket_log) = socket_at(&log, 0);
    assert!(sent_on(&socket_log).is_empty());

    port.handle_socket_event(SocketEvent::Connected { socket }, t0 + Duration::from_millis(40));
    let sent = sent_on(&socket_log);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        StunMessage::decode(&sent[0]).unwrap().msg_type(),
        MessageType::AllocateRequest
    );
}

#[test]
fn tcp_close_fails_over() {
    let servers = [tcp_server("10.0.0.1:3478"), udp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    let t0 = Instant::now();
    port.prepare_address(t0);

    let (socket, _) = socket_at(&log, 0);
    port.handle_socket_event(
        SocketEvent::Closed {
            socket,
            error: Some(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        },
        t0 + Duration::from_millis(100),
    );

    let events = drain_events(&mut port);
    assert!(events.contains(&PortEvent::ConnectFailure(servers[0])));
    assert_eq!(log.borrow().attempts, vec![ProtocolType::Tcp, ProtocolType::Udp]);
}

// S3: destination lock switches the data path to raw framing.
#[test]
fn lock_acquisition_unwraps_subsequent_sends() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (socket, socket_log, connected_at) = connect_udp(&mut port, &log, t0);
    drain_events(&mut port);

    let dest: SocketAddr = "192.0.2.50:7000".parse().unwrap();
    let sent_before = sent_on(&socket_log).len();

    // First payload send: the primary entry adopts the destination, wraps,
    // and asks for the lock.
    let n = port
        .send_to(b"first", dest, true, connected_at + Duration::from_millis(10))
        .unwrap();
    assert_eq!(n, 5, "caller sees user bytes, not wire size");
    assert_eq!(port.entry_destination(0), Some(dest));

    let sent = sent_on(&socket_log);
    assert_eq!(sent.len(), sent_before + 1);
    let wrapped = StunMessage::decode(sent.last().unwrap()).unwrap();
    assert_eq!(wrapped.msg_type(), MessageType::SendRequest);
    assert_eq!(
        wrapped.attributes()[0],
        StunAttribute::MagicCookie(TURN_MAGIC_COOKIE.to_vec())
    );
    assert_eq!(
        wrapped.attributes()[1],
        StunAttribute::Username(b"ufrag0001".to_vec())
    );
    assert_eq!(wrapped.options(), Some(0x1));
    assert_eq!(wrapped.data(), Some(&b"first"[..]));

    // Server acknowledges the lock.
    port.handle_socket_event(
        read_packet(socket, send_response(0x1)),
        connected_at + Duration::from_millis(20),
    );
    assert_eq!(port.entry_state(0), Some(EntryState::Locked));

    // Second send goes out raw.
    port.send_to(b"second", dest, true, connected_at + Duration::from_millis(30))
        .unwrap();
    let sent = sent_on(&socket_log);
    assert_eq!(sent.last().unwrap(), &b"second".to_vec());
}

// Invariant 8: a set lock never reverts.
#[test]
fn lock_never_reverts() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (socket, socket_log, connected_at) = connect_udp(&mut port, &log, t0);

    let dest: SocketAddr = "192.0.2.50:7000".parse().unwrap();
    port.send_to(b"x", dest, true, connected_at).unwrap();
    port.handle_socket_event(read_packet(socket, send_response(0x1)), connected_at);
    assert_eq!(port.entry_state(0), Some(EntryState::Locked));

    // A later response without the lock bit changes nothing.
    port.handle_socket_event(read_packet(socket, send_response(0x0)), connected_at);
    assert_eq!(port.entry_state(0), Some(EntryState::Locked));

    port.send_to(b"still-raw", dest, true, connected_at).unwrap();
    assert_eq!(sent_on(&socket_log).last().unwrap(), &b"still-raw".to_vec());
}

// Invariant 7: the lock is only requested for the entry's own destination.
#[test]
fn send_to_other_destination_carries_no_lock_request() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (_, socket_log, connected_at) = connect_udp(&mut port, &log, t0);

    let own: SocketAddr = "192.0.2.50:7000".parse().unwrap();
    let other: SocketAddr = "192.0.2.60:7000".parse().unwrap();
    port.send_to(b"mine", own, true, connected_at).unwrap();

    // A second destination spawns its own entry; until it connects, the
    // primary relays the packet wrapped, without the lock request.
    port.send_to(b"yours", other, true, connected_at).unwrap();
    assert_eq!(port.entry_count(), 2);
    assert_eq!(port.entry_destination(1), Some(other));

    let sent = sent_on(&socket_log);
    let wrapped = StunMessage::decode(sent.last().unwrap()).unwrap();
    assert_eq!(wrapped.msg_type(), MessageType::SendRequest);
    assert_eq!(wrapped.options(), None);
}

// S4: data indications synthesize the remote address.
#[test]
fn data_indication_delivers_payload_with_source_address() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (socket, _, connected_at) = connect_udp(&mut port, &log, t0);
    drain_events(&mut port);

    port.handle_socket_event(
        read_packet(socket, data_indication("203.0.113.9:5000", b"hi")),
        connected_at + Duration::from_millis(10),
    );

    let events = drain_events(&mut port);
    assert_eq!(
        events,
        vec![PortEvent::UnmatchedPacket {
            remote: "203.0.113.9:5000".parse().unwrap(),
            data: b"hi".to_vec(),
            proto: ProtocolType::Udp,
        }]
    );
}

// Invariant 5: unframed payload needs the lock.
#[test]
fn unframed_payload_dropped_until_locked() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (socket, _, connected_at) = connect_udp(&mut port, &log, t0);
    drain_events(&mut port);

    let dest: SocketAddr = "192.0.2.50:7000".parse().unwrap();
    port.send_to(b"adopt", dest, true, connected_at).unwrap();

    // Unlocked: raw payload is dropped.
    port.handle_socket_event(read_packet(socket, b"raw payload".to_vec()), connected_at);
    assert!(drain_events(&mut port).is_empty());

    // Locked: delivered unchanged, attributed to the entry's destination.
    port.handle_socket_event(read_packet(socket, send_response(0x1)), connected_at);
    port.handle_socket_event(read_packet(socket, b"raw payload".to_vec()), connected_at);
    let events = drain_events(&mut port);
    assert_eq!(
        events,
        vec![PortEvent::UnmatchedPacket {
            remote: dest,
            data: b"raw payload".to_vec(),
            proto: ProtocolType::Udp,
        }]
    );
}

// S5: an allocate error inside the retry window leads to a later retry.
#[test]
fn allocate_error_within_window_retries_via_keep_alive() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    port.prepare_address(t0);

    let (socket, socket_log) = socket_at(&log, 0);
    let sent = sent_on(&socket_log);
    let error_at = t0 + Duration::from_millis(250);
    port.handle_socket_event(read_packet(socket, allocate_error(&sent[0], 600)), error_at);

    assert!(!port.ready());
    // The retry rides the keep-alive schedule.
    assert_eq!(port.poll_timeout(), Some(error_at + KEEP_ALIVE_DELAY));

    port.handle_timeout(error_at + KEEP_ALIVE_DELAY);
    let sent = sent_on(&socket_log);
    assert_eq!(sent.len(), 2);

    port.handle_socket_event(
        read_packet(socket, allocate_ok(&sent[1], "198.51.100.7:40000")),
        error_at + KEEP_ALIVE_DELAY + Duration::from_millis(30),
    );
    assert!(port.ready());
}

// Invariant 3 and S6: the retransmission ladder, then exhaustion.
#[test]
fn allocate_retry_schedule_then_exhaustion() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    port.prepare_address(t0);

    let (_, socket_log) = socket_at(&log, 0);
    let mut expected_sends = 1;
    let mut at = t0;
    for delay_ms in [200u64, 200, 400, 800, 1600] {
        assert_eq!(sent_on(&socket_log).len(), expected_sends);
        assert_eq!(port.poll_timeout(), Some(at + Duration::from_millis(delay_ms)));
        at += Duration::from_millis(delay_ms);
        port.handle_timeout(at);
        expected_sends += 1;
    }

    // The fifth deadline fired the timeout instead of a sixth transmission.
    assert_eq!(sent_on(&socket_log).len(), 5);
    assert_eq!(port.entry_state(0), Some(EntryState::Exhausted));
    let events = drain_events(&mut port);
    assert!(events.contains(&PortEvent::ConnectFailure(udp_server("10.0.0.1:3478"))));

    // S6: nothing can be sent any more.
    let err = port
        .send_to(b"hi", "192.0.2.50:7000".parse().unwrap(), true, at)
        .unwrap_err();
    assert!(matches!(err, SendError::WouldBlock));
    assert_eq!(port.last_error(), Some(io::ErrorKind::WouldBlock));
}

// Invariant 1: one creation attempt per server before failing over.
#[test]
fn socket_creation_failure_walks_the_server_list_once() {
    let servers = [udp_server("10.0.0.1:3478"), tcp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    log.borrow_mut().fail_all = true;

    port.prepare_address(Instant::now());

    assert_eq!(
        log.borrow().attempts,
        vec![ProtocolType::Udp, ProtocolType::Tcp]
    );
    assert_eq!(port.entry_state(0), Some(EntryState::Exhausted));
}

// Late events from a disposed connection's socket are discarded.
#[test]
fn stale_socket_events_are_ignored() {
    let servers = [tcp_server("10.0.0.1:3478"), udp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    let t0 = Instant::now();
    port.prepare_address(t0);

    let (old_socket, _) = socket_at(&log, 0);
    port.handle_timeout(t0 + Duration::from_secs(3));
    drain_events(&mut port);

    // A valid-looking allocate response on the replaced TCP socket must not
    // connect the entry.
    let (_, udp_log) = socket_at(&log, 1);
    let sent = sent_on(&udp_log);
    port.handle_socket_event(
        read_packet(old_socket, allocate_ok(&sent[0], "198.51.100.99:40000")),
        t0 + Duration::from_millis(3200),
    );
    assert!(!port.ready());
    assert!(drain_events(&mut port).is_empty());

    // So must a late close event.
    port.handle_socket_event(
        SocketEvent::Closed {
            socket: old_socket,
            error: None,
        },
        t0 + Duration::from_millis(3300),
    );
    assert_eq!(log.borrow().attempts.len(), 2, "no further failover");
}

// Options apply to live sockets and replay onto future ones.
#[test]
fn socket_options_replay_across_failover() {
    let servers = [udp_server("10.0.0.1:3478"), udp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    let t0 = Instant::now();
    port.prepare_address(t0);

    port.set_option(SocketOption::ReceiveBuffer, 1 << 16).unwrap();
    let (_, first_log) = socket_at(&log, 0);
    assert_eq!(
        first_log.borrow().options,
        vec![(SocketOption::ReceiveBuffer, 1 << 16)]
    );

    // Exhaust the allocate on the first server to force failover.
    let mut at = t0;
    for delay_ms in [200u64, 200, 400, 800, 1600] {
        at += Duration::from_millis(delay_ms);
        port.handle_timeout(at);
    }

    let (_, second_log) = socket_at(&log, 1);
    assert_eq!(
        second_log.borrow().options,
        vec![(SocketOption::ReceiveBuffer, 1 << 16)]
    );
}

// Invariant 6: payload destinations always end up with a dedicated entry.
#[test]
fn payload_destinations_bind_entries() {
    let (mut port, log) = setup(&[udp_server("10.0.0.1:3478")]);
    let t0 = Instant::now();
    let (_, _, connected_at) = connect_udp(&mut port, &log, t0);

    let d1: SocketAddr = "192.0.2.50:7000".parse().unwrap();
    let d2: SocketAddr = "192.0.2.60:7000".parse().unwrap();

    port.send_to(b"one", d1, true, connected_at).unwrap();
    assert_eq!(port.entry_count(), 1);
    assert_eq!(port.entry_destination(0), Some(d1));

    port.send_to(b"two", d2, true, connected_at).unwrap();
    assert_eq!(port.entry_count(), 2);
    assert_eq!(port.entry_destination(1), Some(d2));

    // Non-payload traffic toward an unknown destination creates nothing.
    port.send_to(b"ctl", "192.0.2.70:7000".parse().unwrap(), false, connected_at)
        .unwrap();
    assert_eq!(port.entry_count(), 2);
}

// A second destination's entry seeds its server cursor from the primary.
#[test]
fn new_entries_inherit_the_primary_server_index() {
    let servers = [tcp_server("10.0.0.1:3478"), udp_server("10.0.0.2:3478")];
    let (mut port, log) = setup(&servers);
    let t0 = Instant::now();
    port.prepare_address(t0);

    // Soft-time-out the TCP server so the primary sits at index 1.
    port.handle_timeout(t0 + Duration::from_secs(3));
    let (second_socket, second_log) = socket_at(&log, 1);
    let sent = sent_on(&second_log);
    let at = t0 + Duration::from_millis(3100);
    port.handle_socket_event(
        read_packet(second_socket, allocate_ok(&sent[0], "198.51.100.7:40000")),
        at,
    );
    assert!(port.ready());
    drain_events(&mut port);

    // The new entry connects straight to the second (UDP) server instead
    // of starting over at the TCP one.
    port.send_to(b"p", "192.0.2.50:7000".parse().unwrap(), true, at).unwrap();
    port.send_to(b"q", "192.0.2.60:7000".parse().unwrap(), true, at).unwrap();
    assert_eq!(
        log.borrow().attempts,
        vec![ProtocolType::Tcp, ProtocolType::Udp, ProtocolType::Udp]
    );
}
