//! Single deadline queue for fleet-wide sync scheduling.
//!
//! One binary heap replaces a timer per device: the sync worker sleeps
//! until the earliest live deadline, wakes once, and pops whatever is due.
//! Cancellation is lazy: entries are invalidated by bumping the device's
//! epoch and skipped when they surface at the heap head, so cancel and
//! reschedule are O(1).

use fleetgate_core::DeviceId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::time::Instant;

/// Min-heap of per-device deadlines with lazy invalidation.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, DeviceId)>>,
    /// Epoch of the live entry per device; heap entries with a stale epoch
    /// are dead.
    epochs: HashMap<DeviceId, u64>,
    counter: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) a device. A previous pending deadline for
    /// the same device is superseded.
    pub fn schedule(&mut self, id: DeviceId, at: Instant) {
        self.counter += 1;
        self.epochs.insert(id.clone(), self.counter);
        self.heap.push(Reverse((at, self.counter, id)));
    }

    /// Drop a device's pending deadline. Returns false when none was live.
    pub fn cancel(&mut self, id: &DeviceId) -> bool {
        self.epochs.remove(id).is_some()
    }

    /// Earliest live deadline, pruning dead heap heads on the way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, epoch, id))) = self.heap.peek() {
            if self.epochs.get(id) == Some(epoch) {
                return Some(*at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop one device whose deadline has passed, consuming its entry.
    pub fn pop_due(&mut self, now: Instant) -> Option<DeviceId> {
        while let Some(Reverse((at, epoch, id))) = self.heap.peek() {
            if self.epochs.get(id) != Some(epoch) {
                self.heap.pop();
                continue;
            }
            if *at > now {
                return None;
            }
            let Reverse((_, _, id)) = self.heap.pop()?;
            self.epochs.remove(&id);
            return Some(id);
        }
        None
    }

    /// Number of live deadlines.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}
