// Admission control for behavior steps.
//
// A caller may ask for steps faster than one network round-trip, but an
// agent never has more than one step running plus one waiting:
//
//   depth 0 (idle)    request() starts a step and returns at once
//   depth 1 (running) request() queues a second step and blocks until the
//                     running one finishes (so the queued one has started)
//   depth 2 (queued)  request() blocks for a free slot, then proceeds as above
//
// Every accepted request is executed exactly once. Requests are numbered as
// they are accepted, so concurrent requesters each wait for their own step
// and not for whatever happens to be queued.
//
// `close()` refuses new requests; steps already accepted still run, and the
// worker's `next_step()` only returns false once they have all completed.

use parking_lot::{Condvar, Mutex};

/// One step running plus one queued.
pub const MAX_DEPTH: u64 = 2;

#[derive(Default)]
pub struct StepGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    requested: u64,
    completed: u64,
    closed: bool,
}

impl GateState {
    fn depth(&self) -> u64 {
        self.requested - self.completed
    }
}

impl StepGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one step. Returns false if the gate was closed before the step
    /// could be admitted.
    pub fn request(&self) -> bool {
        let mut state = self.state.lock();
        while state.depth() >= MAX_DEPTH && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return false;
        }

        state.requested += 1;
        let ticket = state.requested;
        self.changed.notify_all();

        // Return once every step admitted before this one has finished.
        while state.completed + 1 < ticket {
            self.changed.wait(&mut state);
        }
        true
    }

    /// Worker side: block until a step is pending. Returns false once the
    /// gate is closed and nothing is left to run.
    pub fn next_step(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.depth() > 0 {
                return true;
            }
            if state.closed {
                return false;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Worker side: the step returned by `next_step()` has finished.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        self.changed.notify_all();
    }

    /// Block until no step is running or queued.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.depth() > 0 {
            self.changed.wait(&mut state);
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn depth(&self) -> u64 {
        self.state.lock().depth()
    }

    /// Steps run to completion so far.
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }
}
