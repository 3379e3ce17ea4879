// radio_relay_hub: proximity-filtered packet relay for swarm agents.
//
// The hub simulates a local broadcast radio. Every agent holds one TCP
// connection to it; on each tick the hub forwards every agent's packets only
// to agents within `neighbor_range` of it, and echoes each agent its own
// authoritative position. The hub never interprets message payloads.
//
// Module overview:
// - `session.rs`: `Session`: one agent connection: receive thread, inbox,
//                 liveness, write half of the socket.
// - `hub.rs`:     `RelayHub`: acceptor thread, the forwarding tick, optional
//                 ticker thread, external position updates, teardown.
// - `config.rs`:  `RelayConfig`: JSON-loadable settings with defaults.
// - `error.rs`:   `RelayError`: bind failure and configuration errors.
//
// Dependencies: `radio_relay_protocol` (packet codec and shared types). No
// dependency on the agent crate.
//
// The hub can run as a standalone binary (`main.rs`) or be embedded in
// another process through `RelayHub::start`.

pub mod config;
pub mod error;
pub mod hub;
pub mod session;

pub use config::RelayConfig;
pub use error::RelayError;
pub use hub::{RelayHub, TickOutcome, TickStats};
