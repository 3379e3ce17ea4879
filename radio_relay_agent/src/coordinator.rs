// Step coordination: the worker thread that runs behavior steps.
//
// `StepCoordinator` owns a `StepGate` and one worker thread. The caller's
// thread admits steps through the gate; the worker runs one `StepPipeline`
// pass per admitted step:
//
// 1. Wait until the hub has echoed a position (only ever blocks before the
//    first echo, or not at all once the transport is dead).
// 2. Drain the transport inbox.
// 3. Rebuild the interpreter's neighbor view and deliver messages (see
//    `neighbors.rs`).
// 4. Publish the self position.
// 5. Run exactly one interpreter step.
// 6. Send every outbound message in one packet stamped with the self
//    position.
//
// A step that cannot get a position (transport dead, or the coordinator is
// stopping) is skipped but still completes, so admitted requests never hang.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use radio_relay_protocol::Packet;
use tracing::{debug, trace, warn};

use crate::gate::StepGate;
use crate::interpreter::Interpreter;
use crate::neighbors::NeighborTable;
use crate::transport::AgentTransport;

pub struct StepCoordinator {
    gate: Arc<StepGate>,
    stopping: Arc<AtomicBool>,
    transport: Arc<AgentTransport>,
    worker: Option<JoinHandle<()>>,
}

struct StepPipeline<I> {
    transport: Arc<AgentTransport>,
    interpreter: Arc<Mutex<I>>,
    neighbors: NeighborTable,
    stopping: Arc<AtomicBool>,
}

impl StepCoordinator {
    pub fn start<I>(
        transport: Arc<AgentTransport>,
        interpreter: Arc<Mutex<I>>,
        patience: Duration,
    ) -> Self
    where
        I: Interpreter + 'static,
    {
        let gate = Arc::new(StepGate::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let mut pipeline = StepPipeline {
            transport: Arc::clone(&transport),
            interpreter,
            neighbors: NeighborTable::new(patience),
            stopping: Arc::clone(&stopping),
        };

        let worker_gate = Arc::clone(&gate);
        let worker = thread::spawn(move || {
            while worker_gate.next_step() {
                pipeline.run();
                worker_gate.complete();
            }
        });

        Self {
            gate,
            stopping,
            transport,
            worker: Some(worker),
        }
    }

    /// Admit one step; see `StepGate::request` for when this blocks.
    /// Returns false once the coordinator has been stopped.
    pub fn request_step(&self) -> bool {
        self.gate.request()
    }

    pub fn wait_idle(&self) {
        self.gate.wait_idle();
    }

    /// Steps running or queued (0, 1 or 2).
    pub fn depth(&self) -> u64 {
        self.gate.depth()
    }

    pub fn completed_steps(&self) -> u64 {
        self.gate.completed()
    }

    /// Refuse further steps, let the admitted ones finish, and join the
    /// worker. Idempotent.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.gate.close();
        self.transport.wake_waiters();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for StepCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<I: Interpreter> StepPipeline<I> {
    fn run(&mut self) {
        let comm_id = self.transport.comm_id();
        let Some(own) = self.transport.wait_for_position(&self.stopping) else {
            debug!(%comm_id, "no self position, skipping step");
            return;
        };

        let batch = self.transport.drain_inbox();
        let mut interp = self.interpreter.lock();
        self.neighbors
            .refresh(&batch, own, Instant::now(), &mut *interp);
        interp.set_self_position(own);
        interp.run_one_step();

        let mut messages = Vec::new();
        while let Some(message) = interp.next_outbound_message() {
            if message.is_empty() {
                trace!(%comm_id, "dropping empty outbound message");
                continue;
            }
            messages.push(message);
        }
        drop(interp);

        trace!(
            %comm_id,
            inbound = batch.len(),
            neighbors = self.neighbors.len(),
            outbound = messages.len(),
            "step"
        );
        if let Err(e) = self.transport.send(&Packet::new(own, comm_id, messages)) {
            warn!(%comm_id, error = %e, "failed to send step packet");
        }
    }
}
