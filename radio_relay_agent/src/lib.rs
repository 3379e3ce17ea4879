// radio_relay_agent: the agent side of the swarm radio relay.
//
// An agent is a behavior-script interpreter wired to the relay hub. The
// caller requests steps; before each step the agent turns whatever the hub
// forwarded since the last one into neighbor bearings and inbound messages
// for the interpreter, runs one interpreter step, and sends the resulting
// messages back through the hub.
//
// Module overview:
// - `transport.rs`:   `AgentTransport`: socket, handshake, receive thread,
//                     inbox, self position from the hub's echo.
// - `gate.rs`:        `StepGate`: one step running plus one queued.
// - `coordinator.rs`: `StepCoordinator`: worker thread and the per-step
//                     pipeline.
// - `neighbors.rs`:   `NeighborTable`: dedup by sender, expiry after
//                     `patience`.
// - `geometry.rs`:    `bearing()`: distance/azimuth/elevation.
// - `interpreter.rs`: `Interpreter`: the calls a step makes.
// - `agent.rs`:       `Agent`: transport + coordinator + interpreter.
// - `swarm.rs`:       `Swarm`: every agent of a process, with id assignment.
// - `config.rs`, `error.rs`: `AgentConfig`, `AgentError`.
//
// Dependencies: `radio_relay_protocol` only. No dependency on the hub crate.

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod geometry;
pub mod interpreter;
pub mod neighbors;
pub mod swarm;
pub mod transport;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::AgentError;
pub use geometry::{Bearing, bearing};
pub use interpreter::Interpreter;
pub use swarm::Swarm;
