//! Lock-free vote scoreboard and response counters.
//!
//! Workers publish each participant's latest response kind with a `Release`
//! store into a dedicated slot; the control thread reads the slots with
//! `Acquire` loads, but only after the pause rendezvous guarantees every
//! worker is parked. One writer per slot, so no compare-and-swap is needed.

use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};

use crate::protocol::MsgKind;

/// Per-participant response slots, indexed by `participant_id - 1`.
pub struct Scoreboard {
    slots: Vec<AtomicI16>,
}

impl Scoreboard {
    pub fn new(participants: usize) -> Self {
        let slots = (0..participants)
            .map(|_| AtomicI16::new(MsgKind::Lost.code()))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Clear every slot back to the `Lost` sentinel. Called between phases
    /// while all workers are parked.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(MsgKind::Lost.code(), Ordering::Release);
        }
    }

    /// Publish a response from `participant_id` (1-based).
    pub fn record(&self, participant_id: i16, kind: MsgKind) {
        let idx = (participant_id - 1) as usize;
        self.slots[idx].store(kind.code(), Ordering::Release);
    }

    /// Read the slot for `participant_id` (1-based). Unknown codes cannot
    /// occur since slots only ever hold codes written via [`MsgKind`], but a
    /// torn value degrades to `Lost` rather than panicking.
    pub fn read(&self, participant_id: i16) -> MsgKind {
        let idx = (participant_id - 1) as usize;
        let code = self.slots[idx].load(Ordering::Acquire);
        MsgKind::from_code(code).unwrap_or(MsgKind::Lost)
    }

    /// Iterate all slots in participant order.
    pub fn iter(&self) -> impl Iterator<Item = (i16, MsgKind)> + '_ {
        (1..=self.slots.len() as i16).map(move |id| (id, self.read(id)))
    }
}

/// Per-worker response counters. The control thread sums them to learn how
/// many responses have arrived in the current phase; workers only ever touch
/// their own counter.
pub struct ResponseCounters {
    counts: Vec<AtomicU64>,
}

impl ResponseCounters {
    pub fn new(workers: usize) -> Self {
        Self {
            counts: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Count one response on behalf of `worker`.
    pub fn bump(&self, worker: usize) {
        self.counts[worker].fetch_add(1, Ordering::Release);
    }

    /// Zero one worker's counter. Each worker zeroes its own while parked.
    pub fn zero(&self, worker: usize) {
        self.counts[worker].store(0, Ordering::Release);
    }

    /// Responses observed across all workers this phase.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .sum()
    }
}
