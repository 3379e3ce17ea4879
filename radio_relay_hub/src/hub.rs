// The relay hub: accepts agent connections and runs forwarding ticks.
//
// Architecture: thread-per-reader plus one shared state lock.
//
// - **Acceptor thread** (non-blocking `TcpListener::accept()` loop): hands
//   each new connection to a short-lived handshake thread, which reads the
//   comm_id and registers a `Session` for it, up to `expected_clients`.
//   Duplicate ids, id 0, and late arrivals are dropped. A peer that never
//   sends its handshake only ties up its own thread.
// - **Session receive threads** (one per agent, see `session.rs`): decode
//   packets into per-session inboxes. They never touch the hub state.
// - **Ticker thread** (optional, when `tick_hz` is set): calls `tick()` at a
//   fixed period. Callers may also call `tick()` directly.
//
// All mutation of the session and position maps (accept, tick, teardown,
// external position updates) happens under the single `state` mutex, so ticks
// are serialized no matter who drives them, and only a tick ever writes to an
// agent socket.
//
// A tick does nothing until the hub is ready: every expected agent is
// connected and has a known position. From then on each tick drains every
// sender's inbox (substituting a position heartbeat for an empty one), echoes
// each agent its own position, and forwards each sender's batch to every
// other agent strictly within `neighbor_range`. A failed send drops only that
// receiver. A tick in which no send succeeds at all means nobody is left
// listening, and the hub tears itself down.
//
// Positions come from the packets agents send, unless an external feed has
// called `update_position` for that comm_id. From then on the feed owns that
// agent's position and packet positions are ignored for it.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use radio_relay_protocol::{CommId, Packet, PacketCodec, Position};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::session::Session;

/// Sleep between non-blocking accept attempts.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Minimum ticker sleep while the hub is still waiting for agents.
const NOT_READY_POLL: Duration = Duration::from_millis(5);

/// Result of one call to `RelayHub::tick()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The hub has already been torn down.
    Stopped,
    /// Still waiting for agents to connect or report a position.
    NotReady,
    /// Packets were forwarded.
    Forwarded(TickStats),
    /// No send succeeded; the hub tore itself down during this tick.
    Idle,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Successful sends, self-echoes included.
    pub sends: usize,
    /// Receivers whose sessions were destroyed after a failed send.
    pub dropped: Vec<CommId>,
}

/// Handle to a running relay hub. Dropping it tears the hub down.
pub struct RelayHub {
    shared: Arc<HubShared>,
    local_addr: SocketAddr,
    acceptor: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

struct HubShared {
    config: RelayConfig,
    codec: PacketCodec,
    alive: AtomicBool,
    state: Mutex<HubState>,
}

struct HubState {
    sessions: BTreeMap<CommId, Session>,
    positions: BTreeMap<CommId, Position>,
    /// Agents whose position comes from `update_position`, not their packets.
    externally_fed: BTreeSet<CommId>,
    /// Latched once every expected agent has connected with a position.
    started: bool,
}

impl RelayHub {
    /// Bind the listen address and start the acceptor (and ticker, if
    /// configured). A bind failure is returned immediately.
    pub fn start(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let addr = config.bind_addr();
        let bind_err = |source| RelayError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        let tick_period = config.tick_period();
        info!(
            %local_addr,
            expected = config.expected_clients,
            range = config.neighbor_range,
            tick_hz = ?config.tick_hz,
            "relay listening"
        );

        let shared = Arc::new(HubShared {
            codec: PacketCodec::new(config.byte_order),
            config,
            alive: AtomicBool::new(true),
            state: Mutex::new(HubState {
                sessions: BTreeMap::new(),
                positions: BTreeMap::new(),
                externally_fed: BTreeSet::new(),
                started: false,
            }),
        });

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = thread::spawn(move || accept_loop(listener, acceptor_shared));

        let ticker = tick_period.map(|period| {
            let ticker_shared = Arc::clone(&shared);
            thread::spawn(move || tick_loop(ticker_shared, period))
        });

        Ok(Self {
            shared,
            local_addr,
            acceptor: Some(acceptor),
            ticker,
        })
    }

    /// The bound address (useful when port 0 lets the OS pick).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once the hub has been destroyed or has shut itself down.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// True once every expected agent has connected and has a position.
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().started
    }

    pub fn session_count(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    pub fn position_of(&self, comm_id: CommId) -> Option<Position> {
        self.shared.state.lock().positions.get(&comm_id).copied()
    }

    /// Set an agent's position from an external source, such as a motion
    /// capture feed. Once fed, positions reported in that agent's own
    /// packets are ignored.
    pub fn update_position(&self, comm_id: CommId, position: Position) {
        let mut state = self.shared.state.lock();
        state.externally_fed.insert(comm_id);
        state.positions.insert(comm_id, position);
    }

    /// Run one forwarding tick. Safe to call from any thread; concurrent
    /// calls (including the internal ticker) run one at a time.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Close every session, stop the background threads, and mark the hub
    /// dead. Idempotent.
    pub fn destroy(&mut self) {
        self.shared.teardown("destroyed by owner");
        for handle in [self.acceptor.take(), self.ticker.take()].into_iter().flatten() {
            let _ = handle.join();
        }
    }
}

impl Drop for RelayHub {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl HubShared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn tick(&self) -> TickOutcome {
        let mut guard = self.state.lock();
        if !self.is_alive() {
            return TickOutcome::Stopped;
        }
        let state = &mut *guard;

        state.reap_closed_sessions();
        state.absorb_reported_positions();

        if !state.started {
            if !state.is_ready(self.config.expected_clients) {
                return TickOutcome::NotReady;
            }
            state.started = true;
            info!(agents = state.sessions.len(), "all agents connected, forwarding started");
        }

        let stats = self.forward(state);
        if stats.sends == 0 {
            warn!("no agent reachable during tick, relay shutting down");
            self.teardown_locked(state, "idle");
            return TickOutcome::Idle;
        }

        debug!(sends = stats.sends, dropped = stats.dropped.len(), "tick");
        TickOutcome::Forwarded(stats)
    }

    /// The forwarding pass of one tick. Caller holds the state lock.
    fn forward(&self, state: &mut HubState) -> TickStats {
        let range = self.config.neighbor_range;

        // Drain every sender before sending anything, so each receiver's
        // range check uses the positions reported in this tick.
        let mut outgoing = Vec::with_capacity(state.sessions.len());
        for (&id, session) in &state.sessions {
            let mut batch = session.drain();
            if let Some(latest) = batch.last() {
                if !state.externally_fed.contains(&id) {
                    state.positions.insert(id, latest.position);
                }
                session.take_reported_position();
            }
            let Some(&position) = state.positions.get(&id) else {
                continue;
            };
            if batch.is_empty() {
                batch.push(Packet::position_only(id, position));
            }
            let wire = self.encode_batch(id, &batch);
            let echo = self.encode_batch(id, &[Packet::position_only(id, position)]);
            outgoing.push((id, position, wire, echo));
        }

        let mut stats = TickStats::default();
        let mut failed = BTreeSet::new();

        for (sender, sender_pos, wire, echo) in &outgoing {
            for (receiver, receiver_pos, _, _) in &outgoing {
                if failed.contains(receiver) {
                    continue;
                }
                let bytes = if receiver == sender {
                    echo
                } else if sender_pos.distance_to(*receiver_pos) < range {
                    wire
                } else {
                    continue;
                };
                let Some(session) = state.sessions.get_mut(receiver) else {
                    continue;
                };
                match session.send(bytes) {
                    Ok(()) => stats.sends += 1,
                    Err(e) => {
                        warn!(comm_id = %receiver, error = %e, "send failed, dropping session");
                        failed.insert(*receiver);
                    }
                }
            }
        }

        for id in failed {
            state.remove_session(id);
            stats.dropped.push(id);
        }
        stats
    }

    fn encode_batch(&self, sender: CommId, batch: &[Packet]) -> Vec<u8> {
        let mut wire = Vec::new();
        for packet in batch {
            if let Err(e) = self.codec.encode_into(packet, &mut wire) {
                warn!(comm_id = %sender, error = %e, "dropping unencodable packet");
            }
        }
        wire
    }

    /// Register a freshly accepted connection once its handshake is read.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_read_timeout(Some(self.config.handshake_timeout())))
        {
            warn!(%peer, error = %e, "failed to configure accepted socket");
            return;
        }

        let comm_id = match self.codec.read_handshake(&mut &stream) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(%peer, "peer closed before handshake");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "handshake failed");
                return;
            }
        };
        if !comm_id.is_valid() {
            warn!(%peer, "rejecting handshake with comm_id 0");
            return;
        }

        let mut state = self.state.lock();
        if !self.is_alive() {
            return;
        }
        if let Some(existing) = state.sessions.get(&comm_id) {
            if existing.is_alive() {
                warn!(%comm_id, %peer, "comm_id already connected, rejecting");
                return;
            }
            // The previous connection with this id has died but was not
            // reaped yet.
            state.remove_session(comm_id);
        }
        let expected = self.config.expected_clients;
        if state.started || state.sessions.len() >= expected {
            warn!(%comm_id, %peer, expected, "relay is full, rejecting");
            return;
        }

        match Session::spawn(
            comm_id,
            stream,
            self.codec,
            self.config.recv_timeout(),
            self.config.send_timeout(),
        ) {
            Ok(session) => {
                state.sessions.insert(comm_id, session);
                info!(
                    %comm_id,
                    %peer,
                    connected = state.sessions.len(),
                    expected,
                    "agent connected"
                );
            }
            Err(e) => warn!(%comm_id, %peer, error = %e, "failed to start session"),
        }
    }

    fn teardown(&self, reason: &str) {
        let mut state = self.state.lock();
        self.teardown_locked(&mut state, reason);
    }

    fn teardown_locked(&self, state: &mut HubState, reason: &str) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let sessions = std::mem::take(&mut state.sessions);
        let count = sessions.len();
        for (_, mut session) in sessions {
            session.close();
        }
        state.positions.clear();
        state.externally_fed.clear();
        info!(reason, closed_sessions = count, "relay stopped");
    }
}

impl HubState {
    fn is_ready(&self, expected: usize) -> bool {
        self.sessions.len() == expected
            && self.sessions.keys().all(|id| self.positions.contains_key(id))
    }

    fn remove_session(&mut self, id: CommId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
        }
        self.positions.remove(&id);
        self.externally_fed.remove(&id);
    }

    /// Close and forget sessions whose receive loop has ended.
    fn reap_closed_sessions(&mut self) {
        let closed: Vec<CommId> = self
            .sessions
            .values()
            .filter(|s| !s.is_alive())
            .map(Session::comm_id)
            .collect();
        for id in closed {
            info!(comm_id = %id, "removing closed session");
            self.remove_session(id);
        }
    }

    /// Record positions that agents reported since the last tick, including
    /// before forwarding has started.
    fn absorb_reported_positions(&mut self) {
        for (&id, session) in &self.sessions {
            let Some(position) = session.take_reported_position() else {
                continue;
            };
            if !self.externally_fed.contains(&id) {
                self.positions.insert(id, position);
            }
        }
    }
}

/// Acceptor thread: admit connections until the hub stops.
fn accept_loop(listener: TcpListener, shared: Arc<HubShared>) {
    while shared.is_alive() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.admit(stream, peer));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed, acceptor stopping");
                break;
            }
        }
    }
}

/// Ticker thread: tick at a fixed period until the hub stops.
fn tick_loop(shared: Arc<HubShared>, period: Duration) {
    while shared.is_alive() {
        let started = Instant::now();
        match shared.tick() {
            TickOutcome::Stopped | TickOutcome::Idle => break,
            TickOutcome::NotReady => thread::sleep(period.max(NOT_READY_POLL)),
            TickOutcome::Forwarded(_) => {
                let elapsed = started.elapsed();
                if elapsed < period {
                    thread::sleep(period - elapsed);
                } else {
                    thread::yield_now();
                }
            }
        }
    }
}
