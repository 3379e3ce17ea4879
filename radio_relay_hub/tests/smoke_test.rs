// Integration smoke test for the relay hub.
//
// Starts a hub on localhost and connects plain TCP clients that speak the
// protocol crate's handshake and packet codec directly, with no agent
// crate involved. Exercises readiness, the strict range filter, self-echoes,
// external position updates, failure isolation (including a receiver that
// stops reading), idle self-shutdown, handshake rejection and timeouts, and
// the internal ticker.
//
// Most tests drive ticks by hand (`tick_hz: None`) so every assertion lines
// up with a known tick.

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use radio_relay_hub::{RelayConfig, RelayError, RelayHub, TickOutcome};
use radio_relay_protocol::{ByteOrder, CommId, Packet, PacketCodec, Position};

const CODEC: PacketCodec = PacketCodec::new(ByteOrder::Native);

fn config(expected: usize, range: f32) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        expected_clients: expected,
        neighbor_range: range,
        tick_hz: None,
        recv_timeout_ms: 20,
        ..RelayConfig::default()
    }
}

/// A bare protocol client standing in for an agent.
struct RawAgent {
    id: CommId,
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RawAgent {
    /// Connect and send the handshake, optionally followed by a position
    /// report.
    fn connect(addr: SocketAddr, id: u32, position: Option<Position>) -> Self {
        let mut writer = TcpStream::connect(addr).unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());
        let id = CommId(id);
        CODEC.write_handshake(&mut writer, id).unwrap();
        if let Some(position) = position {
            CODEC
                .write_packet(&mut writer, &Packet::position_only(id, position))
                .unwrap();
        }
        Self { id, writer, reader }
    }

    fn send(&mut self, position: Position, messages: &[&[u8]]) {
        let packet = Packet::new(
            position,
            self.id,
            messages.iter().map(|m| m.to_vec()).collect(),
        );
        CODEC.write_packet(&mut self.writer, &packet).unwrap();
    }

    /// Read everything the hub has sent so far. The short timeout must stay
    /// well below any test's tick spacing.
    fn drain(&mut self) -> Vec<Packet> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut packets = Vec::new();
        while let Ok(Some(packet)) = CODEC.read_packet(&mut self.reader) {
            packets.push(packet);
        }
        packets
    }

    /// True if the hub closed this connection.
    fn closed_by_hub(&mut self) -> bool {
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        matches!(CODEC.read_packet(&mut self.reader), Ok(None) | Err(_))
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Tick until the hub starts forwarding. Returns the first forwarding outcome.
fn tick_until_ready(hub: &RelayHub) -> TickOutcome {
    let mut outcome = TickOutcome::NotReady;
    assert!(
        wait_until(|| {
            outcome = hub.tick();
            outcome != TickOutcome::NotReady
        }),
        "hub never became ready"
    );
    outcome
}

fn senders(packets: &[Packet]) -> Vec<CommId> {
    let mut ids: Vec<CommId> = packets.iter().map(|p| p.sender).collect();
    ids.sort();
    ids.dedup();
    ids
}

#[test]
fn waits_for_every_agent_and_position() {
    let hub = RelayHub::start(config(2, 10.0)).unwrap();
    let _a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));

    assert!(wait_until(|| hub.session_count() == 1));
    assert_eq!(hub.tick(), TickOutcome::NotReady);

    // Connected but without any position yet.
    let _b = RawAgent::connect(hub.local_addr(), 2, None);
    assert!(wait_until(|| hub.session_count() == 2));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(hub.tick(), TickOutcome::NotReady);
    assert!(!hub.is_ready());

    hub.update_position(CommId(2), Position::new(1.0, 0.0, 0.0));
    assert!(matches!(tick_until_ready(&hub), TickOutcome::Forwarded(_)));
    assert!(hub.is_ready());
}

#[test]
fn forwards_strictly_within_range() {
    let hub = RelayHub::start(config(3, 5.0)).unwrap();
    let origin = Position::new(0.0, 0.0, 0.0);
    let mut a = RawAgent::connect(hub.local_addr(), 1, Some(origin));
    // Exactly at the range: never forwarded.
    let mut b = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(3.0, 4.0, 0.0)));
    // Marginally inside the range.
    let mut c = RawAgent::connect(hub.local_addr(), 3, Some(Position::new(3.0, 3.99, 0.0)));

    match tick_until_ready(&hub) {
        // Self-echoes: 3. Heartbeats: A<->C and B<->C (B-C are 0.01 apart).
        TickOutcome::Forwarded(stats) => assert_eq!(stats.sends, 7),
        other => panic!("expected Forwarded, got {other:?}"),
    }
    assert_eq!(senders(&a.drain()), vec![CommId(1), CommId(3)]);
    assert_eq!(senders(&b.drain()), vec![CommId(2), CommId(3)]);
    assert_eq!(senders(&c.drain()), vec![CommId(1), CommId(2), CommId(3)]);

    a.send(origin, &[b"ping"]);
    thread::sleep(Duration::from_millis(100));
    hub.tick();

    let at_c = c.drain();
    let from_a: Vec<&Packet> = at_c.iter().filter(|p| p.sender == CommId(1)).collect();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].messages, vec![b"ping".to_vec()]);
    assert!(b.drain().iter().all(|p| p.sender != CommId(1)));
}

#[test]
fn self_echo_ignores_zero_range() {
    let hub = RelayHub::start(config(2, 0.0)).unwrap();
    let spot = Position::new(2.0, 2.0, 0.5);
    let mut a = RawAgent::connect(hub.local_addr(), 10, Some(spot));
    let mut b = RawAgent::connect(hub.local_addr(), 20, Some(spot));

    match tick_until_ready(&hub) {
        TickOutcome::Forwarded(stats) => assert_eq!(stats.sends, 2),
        other => panic!("expected Forwarded, got {other:?}"),
    }

    let at_a = a.drain();
    assert_eq!(at_a, vec![Packet::position_only(CommId(10), spot)]);
    let at_b = b.drain();
    assert_eq!(at_b, vec![Packet::position_only(CommId(20), spot)]);
}

#[test]
fn external_position_update_is_echoed() {
    let hub = RelayHub::start(config(1, 1.0)).unwrap();
    let mut a = RawAgent::connect(hub.local_addr(), 4, Some(Position::new(0.0, 0.0, 0.0)));
    tick_until_ready(&hub);
    a.drain();

    let moved = Position::new(-1.5, 0.25, 2.0);
    hub.update_position(CommId(4), moved);
    assert!(matches!(hub.tick(), TickOutcome::Forwarded(_)));
    assert_eq!(a.drain(), vec![Packet::position_only(CommId(4), moved)]);
    assert_eq!(hub.position_of(CommId(4)), Some(moved));
}

#[test]
fn lone_survivor_keeps_hub_alive() {
    let hub = RelayHub::start(config(2, 10.0)).unwrap();
    let mut a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    let b = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(1.0, 0.0, 0.0)));
    tick_until_ready(&hub);

    drop(b);
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(400) {
        let outcome = hub.tick();
        assert!(
            matches!(outcome, TickOutcome::Forwarded(_)),
            "hub must keep forwarding to the survivor, got {outcome:?}"
        );
        a.drain();
    }
    assert!(hub.is_alive());
    assert_eq!(hub.session_count(), 1);

    // The survivor still gets its own position back.
    hub.tick();
    assert!(a.drain().iter().any(|p| p.sender == CommId(1)));
}

#[test]
fn no_reachable_agent_shuts_hub_down() {
    let hub = RelayHub::start(config(2, 10.0)).unwrap();
    let a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    let b = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(1.0, 0.0, 0.0)));
    tick_until_ready(&hub);

    drop(a);
    drop(b);
    assert!(wait_until(|| hub.tick() == TickOutcome::Idle));
    assert!(!hub.is_alive());
    assert_eq!(hub.tick(), TickOutcome::Stopped);
    assert_eq!(hub.session_count(), 0);
}

#[test]
fn rejects_duplicate_zero_and_late_handshakes() {
    let hub = RelayHub::start(config(2, 10.0)).unwrap();
    let _a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    assert!(wait_until(|| hub.session_count() == 1));

    let mut duplicate = RawAgent::connect(hub.local_addr(), 1, None);
    assert!(duplicate.closed_by_hub());
    let mut zero = RawAgent::connect(hub.local_addr(), 0, None);
    assert!(zero.closed_by_hub());
    assert_eq!(hub.session_count(), 1);

    let _b = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(1.0, 0.0, 0.0)));
    tick_until_ready(&hub);

    let mut late = RawAgent::connect(hub.local_addr(), 3, None);
    assert!(late.closed_by_hub());
    assert_eq!(hub.session_count(), 2);
}

#[test]
fn bind_failure_is_fatal() {
    let first = RelayHub::start(config(1, 1.0)).unwrap();
    let taken = RelayConfig {
        port: first.local_addr().port(),
        ..config(1, 1.0)
    };
    match RelayHub::start(taken) {
        Err(RelayError::Bind { .. }) => {}
        Err(other) => panic!("expected Bind error, got {other}"),
        Ok(_) => panic!("second hub bound an address already in use"),
    }
}

#[test]
fn internal_ticker_delivers_messages() {
    let hub = RelayHub::start(RelayConfig {
        tick_hz: Some(100.0),
        ..config(2, 10.0)
    })
    .unwrap();
    let mut a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    let mut b = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(0.0, 1.0, 0.0)));
    assert!(wait_until(|| hub.is_ready()));

    a.send(Position::new(0.0, 0.0, 0.0), &[b"over", b"the air"]);
    let mut received = Vec::new();
    assert!(wait_until(|| {
        received.extend(
            b.drain()
                .into_iter()
                .filter(|p| p.sender == CommId(1) && !p.messages.is_empty()),
        );
        !received.is_empty()
    }));
    assert_eq!(received[0].messages, vec![b"over".to_vec(), b"the air".to_vec()]);
}

#[test]
fn external_feed_outranks_packet_positions() {
    let hub = RelayHub::start(config(1, 1.0)).unwrap();
    let origin = Position::new(0.0, 0.0, 0.0);
    let mut a = RawAgent::connect(hub.local_addr(), 5, Some(origin));
    tick_until_ready(&hub);
    a.drain();

    // A packet already queued when the feed arrives must not win the tick.
    a.send(origin, &[]);
    thread::sleep(Duration::from_millis(100));
    let fed = Position::new(3.0, 0.0, 0.0);
    hub.update_position(CommId(5), fed);
    assert!(matches!(hub.tick(), TickOutcome::Forwarded(_)));
    assert_eq!(hub.position_of(CommId(5)), Some(fed));
    assert_eq!(a.drain(), vec![Packet::position_only(CommId(5), fed)]);

    // Nor does one sent afterwards.
    a.send(Position::new(-7.0, 1.0, 0.0), &[b"still here"]);
    thread::sleep(Duration::from_millis(100));
    hub.tick();
    hub.tick();
    assert_eq!(hub.position_of(CommId(5)), Some(fed));
    assert!(a.drain().iter().all(|p| p.position == fed));
}

#[test]
fn stalled_receiver_is_dropped_and_hub_keeps_running() {
    let hub = RelayHub::start(RelayConfig {
        send_timeout_ms: 50,
        ..config(2, 10.0)
    })
    .unwrap();
    let mut talker = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    // Never reads, so its socket buffers eventually fill.
    let _stalled = RawAgent::connect(hub.local_addr(), 2, Some(Position::new(1.0, 0.0, 0.0)));
    tick_until_ready(&hub);

    let bulk = vec![0x5a_u8; 1024 * 1024];
    let mut dropped = Vec::new();
    for _ in 0..64 {
        talker.send(Position::new(0.0, 0.0, 0.0), &[&bulk]);
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        let outcome = hub.tick();
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "a stalled receiver must not hold a tick for long"
        );
        talker.drain();
        if let TickOutcome::Forwarded(stats) = outcome {
            if !stats.dropped.is_empty() {
                dropped = stats.dropped;
                break;
            }
        }
    }
    assert_eq!(dropped, vec![CommId(2)]);
    assert!(hub.is_alive());
    assert_eq!(hub.session_count(), 1);

    assert!(matches!(hub.tick(), TickOutcome::Forwarded(_)));
    assert!(talker.drain().iter().any(|p| p.sender == CommId(1)));
}

#[test]
fn silent_connection_does_not_block_admission() {
    let hub = RelayHub::start(RelayConfig {
        handshake_timeout_ms: 3000,
        ..config(1, 1.0)
    })
    .unwrap();
    // Connects but never sends its handshake.
    let _silent = TcpStream::connect(hub.local_addr()).unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let _a = RawAgent::connect(hub.local_addr(), 1, Some(Position::new(0.0, 0.0, 0.0)));
    assert!(wait_until(|| hub.session_count() == 1));
    assert!(started.elapsed() < Duration::from_secs(1));
}
