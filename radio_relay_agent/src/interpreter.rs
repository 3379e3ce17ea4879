// The seam between the step pipeline and a behavior-script interpreter.
//
// The interpreter itself lives outside this workspace; the coordinator only
// needs the calls below. One pipeline run makes them in a fixed order:
// `reset_neighbors`, then `add_neighbor`/`feed_message` for this step's
// inbound traffic, `set_self_position`, exactly one `run_one_step`, and
// finally `next_outbound_message` until it returns `None`.

use radio_relay_protocol::{CommId, Position};

use crate::geometry::Bearing;

pub trait Interpreter: Send {
    /// Forget every neighbor from the previous step.
    fn reset_neighbors(&mut self);

    fn add_neighbor(&mut self, id: CommId, bearing: Bearing);

    /// Deliver one inbound message, tagged with the agent that sent it.
    fn feed_message(&mut self, sender: CommId, message: &[u8]);

    fn set_self_position(&mut self, position: Position);

    fn run_one_step(&mut self);

    /// Next message produced by the last step, in order. `None` once they
    /// have all been taken.
    fn next_outbound_message(&mut self) -> Option<Vec<u8>>;

    /// True once the script has finished and further steps are pointless.
    fn is_done(&self) -> bool;
}
