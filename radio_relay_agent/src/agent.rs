// One swarm agent: a relay connection plus a step coordinator wrapped around
// a caller-owned interpreter.
//
// The interpreter is shared (`Arc<Mutex<I>>`) rather than owned, so the caller
// can inspect it between steps. Teardown order matters: the coordinator is
// stopped first (any admitted step finishes), then the socket is closed.

use std::sync::Arc;

use parking_lot::Mutex;
use radio_relay_protocol::{CommId, Position};
use tracing::info;

use crate::config::AgentConfig;
use crate::coordinator::StepCoordinator;
use crate::error::AgentError;
use crate::interpreter::Interpreter;
use crate::transport::AgentTransport;

pub struct Agent<I: Interpreter + 'static> {
    comm_id: CommId,
    transport: Arc<AgentTransport>,
    coordinator: StepCoordinator,
    interpreter: Arc<Mutex<I>>,
    destroyed: bool,
}

impl<I: Interpreter + 'static> Agent<I> {
    /// Connect to the relay and start the step worker.
    pub fn connect(
        config: &AgentConfig,
        comm_id: CommId,
        interpreter: Arc<Mutex<I>>,
    ) -> Result<Self, AgentError> {
        let transport = Arc::new(AgentTransport::connect(config, comm_id)?);
        let coordinator = StepCoordinator::start(
            Arc::clone(&transport),
            Arc::clone(&interpreter),
            config.patience(),
        );
        Ok(Self {
            comm_id,
            transport,
            coordinator,
            interpreter,
            destroyed: false,
        })
    }

    pub fn comm_id(&self) -> CommId {
        self.comm_id
    }

    /// Ask for one behavior step. Returns immediately when no step is in
    /// flight; otherwise queues this one and blocks until the running step
    /// finishes (or, with one already queued, until a slot frees up).
    pub fn request_step(&self) -> Result<(), AgentError> {
        if !self.transport.is_alive() || !self.coordinator.request_step() {
            return Err(AgentError::Stopped);
        }
        Ok(())
    }

    /// Block until every requested step has run.
    pub fn wait_idle(&self) {
        self.coordinator.wait_idle();
    }

    /// `request_step()` followed by `wait_idle()`.
    pub fn step(&self) -> Result<(), AgentError> {
        self.request_step()?;
        self.wait_idle();
        Ok(())
    }

    pub fn completed_steps(&self) -> u64 {
        self.coordinator.completed_steps()
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub fn is_done(&self) -> bool {
        self.interpreter.lock().is_done()
    }

    pub fn self_position(&self) -> Option<Position> {
        self.transport.self_position()
    }

    pub fn announce_position(&self, position: Position) -> Result<(), AgentError> {
        self.transport.announce_position(position)
    }

    pub fn interpreter(&self) -> &Arc<Mutex<I>> {
        &self.interpreter
    }

    /// Finish any admitted step, then close the connection. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.coordinator.stop();
        self.transport.close();
        info!(comm_id = %self.comm_id, steps = self.completed_steps(), "agent destroyed");
    }
}

impl<I: Interpreter + 'static> Drop for Agent<I> {
    fn drop(&mut self) {
        self.destroy();
    }
}
