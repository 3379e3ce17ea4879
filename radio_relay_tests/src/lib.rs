// Test-only harness for end-to-end relay tests.
//
// Provides `RecordingInterpreter`, an `Interpreter` that remembers everything
// the step pipeline tells it and sends whatever the test queues with `say()`,
// plus helpers that start a real hub on a random port and build matching agent
// configs. Hubs run their internal ticker so agents can step freely.
//
// The only test-specific code here is the interpreter and the blocking
// polling helpers. Networking, forwarding and stepping all go through the
// real hub and agent crates.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use radio_relay_agent::{Agent, AgentConfig, Bearing, Interpreter};
use radio_relay_hub::{RelayConfig, RelayHub};
use radio_relay_protocol::{CommId, Position};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tick rate of test hubs.
const TEST_TICK_HZ: f64 = 200.0;

/// Interpreter double that records the neighbor view, delivered messages, and
/// step count.
#[derive(Debug, Default)]
pub struct RecordingInterpreter {
    /// Neighbor view of the most recent step.
    pub neighbors: Vec<(CommId, Bearing)>,
    /// Every message ever delivered, in delivery order.
    pub heard: Vec<(CommId, Vec<u8>)>,
    pub position: Option<Position>,
    pub steps: u64,
    /// Report done once this many steps have run.
    pub step_limit: Option<u64>,
    queued: Vec<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
}

impl RecordingInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_limit(limit: u64) -> Self {
        Self {
            step_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Queue a message for the next step to send.
    pub fn say(&mut self, message: &[u8]) {
        self.queued.push(message.to_vec());
    }

    pub fn neighbor(&self, id: CommId) -> Option<Bearing> {
        self.neighbors
            .iter()
            .find(|(n, _)| *n == id)
            .map(|(_, b)| *b)
    }

    pub fn heard_from(&self, id: CommId, message: &[u8]) -> bool {
        self.heard.iter().any(|(s, m)| *s == id && m == message)
    }
}

impl Interpreter for RecordingInterpreter {
    fn reset_neighbors(&mut self) {
        self.neighbors.clear();
    }

    fn add_neighbor(&mut self, id: CommId, bearing: Bearing) {
        self.neighbors.push((id, bearing));
    }

    fn feed_message(&mut self, sender: CommId, message: &[u8]) {
        self.heard.push((sender, message.to_vec()));
    }

    fn set_self_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    fn run_one_step(&mut self) {
        self.steps += 1;
        self.outbox.extend(self.queued.drain(..));
    }

    fn next_outbound_message(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    fn is_done(&self) -> bool {
        self.step_limit.is_some_and(|limit| self.steps >= limit)
    }
}

pub type SharedInterpreter = Arc<Mutex<RecordingInterpreter>>;

pub fn shared(interpreter: RecordingInterpreter) -> SharedInterpreter {
    Arc::new(Mutex::new(interpreter))
}

/// Start a hub on a random localhost port with its ticker running.
pub fn start_hub(expected_clients: usize, neighbor_range: f32) -> RelayHub {
    RelayHub::start(RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        expected_clients,
        neighbor_range,
        tick_hz: Some(TEST_TICK_HZ),
        recv_timeout_ms: 20,
        ..RelayConfig::default()
    })
    .expect("failed to start test hub")
}

/// Agent config pointing at `hub`.
pub fn agent_config(hub: &RelayHub) -> AgentConfig {
    AgentConfig {
        recv_timeout_ms: 20,
        ..AgentConfig::for_relay("127.0.0.1", hub.local_addr().port())
    }
}

/// Poll `cond` until it holds, panicking with `what` after `POLL_TIMEOUT`.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Step `agent` until its interpreter satisfies `cond`.
pub fn step_until(
    agent: &Agent<RecordingInterpreter>,
    what: &str,
    mut cond: impl FnMut(&RecordingInterpreter) -> bool,
) {
    wait_until(what, || {
        agent.step().expect("agent stopped while stepping");
        cond(&agent.interpreter().lock())
    });
}
