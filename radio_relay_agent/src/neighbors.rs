// Per-agent neighbor bookkeeping, run at the start of every step.
//
// The hub forwards a packet only while sender and receiver are in range, so
// "heard from recently" is the agent's notion of "is a neighbor". Each step
// the table is rebuilt from the drained inbox:
//
// 1. The batch is walked most-recent first. The first packet seen from a
//    sender sets that neighbor's bearing (its latest position wins); later
//    (older) packets from the same sender do not. Every message of every
//    packet is still delivered, since dedup applies to bearings only.
// 2. Neighbors not heard from this step stay visible, at their last bearing,
//    until `patience` has passed since they were last refreshed. Then they
//    are dropped silently.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use radio_relay_protocol::{CommId, Packet, Position};
use tracing::trace;

use crate::geometry::{Bearing, bearing};
use crate::interpreter::Interpreter;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborEntry {
    pub bearing: Bearing,
    pub refreshed_at: Instant,
}

pub struct NeighborTable {
    entries: BTreeMap<CommId, NeighborEntry>,
    patience: Duration,
}

impl NeighborTable {
    pub fn new(patience: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            patience,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: CommId) -> Option<&NeighborEntry> {
        self.entries.get(&id)
    }

    /// Rebuild the interpreter's neighbor view from one step's inbound batch
    /// (arrival order) and deliver every message in it.
    pub fn refresh<I>(&mut self, batch: &[Packet], own: Position, now: Instant, interp: &mut I)
    where
        I: Interpreter + ?Sized,
    {
        interp.reset_neighbors();

        let mut seen = BTreeSet::new();
        for packet in batch.iter().rev() {
            let sender = packet.sender;
            if seen.insert(sender) {
                let entry = NeighborEntry {
                    bearing: bearing(own, packet.position),
                    refreshed_at: now,
                };
                self.entries.insert(sender, entry);
                interp.add_neighbor(sender, entry.bearing);
            }
            for message in &packet.messages {
                interp.feed_message(sender, message);
            }
        }

        let patience = self.patience;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.refreshed_at) < patience);

        for (&id, entry) in &self.entries {
            if !seen.contains(&id) {
                trace!(comm_id = %id, "carrying neighbor forward");
                interp.add_neighbor(id, entry.bearing);
            }
        }
    }
}
