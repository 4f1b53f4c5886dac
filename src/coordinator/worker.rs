//! Response-collection worker.
//!
//! Each worker busy-polls its assigned participant channels, decodes whatever
//! arrives, publishes the kind on the scoreboard and bumps its response
//! counter. Workers never interpret votes; classification is the control
//! thread's job, done only while every worker is parked.
//!
//! The park protocol: when the control thread raises the pause flag, a worker
//! finishes its current channel poll, zeroes its own response counter and
//! raises its parked flag. The control thread treats "every parked flag up"
//! as the license to touch the scoreboard. A worker that stops (fatal error
//! or shutdown) leaves its parked flag raised so the rendezvous can never
//! hang on a dead thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::channel::{Channel, ReadStatus};
use crate::error::{Error, Result};
use crate::protocol::{now_micros, Message};
use crate::stats::{Sample, StatsBuffer};

use super::Shared;

pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    /// Channel indices this worker polls.
    assigned: Vec<usize>,
    stats: StatsBuffer,
    parked: bool,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>, assigned: Vec<usize>, stats_len: usize) -> Self {
        Self {
            id,
            shared,
            assigned,
            stats: StatsBuffer::new(id, stats_len),
            parked: false,
        }
    }

    /// Poll until stopped; returns the collected samples.
    pub(crate) fn run(mut self) -> StatsBuffer {
        tracing::debug!(worker = self.id, channels = self.assigned.len(), "worker up");

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }

            if self.shared.pause.load(Ordering::Acquire) {
                if !self.parked {
                    // The counter restarts from zero each phase; zeroing here
                    // happens strictly before the parked flag goes up.
                    self.shared.counters.zero(self.id);
                    self.shared.parked[self.id].store(true, Ordering::Release);
                    self.parked = true;
                }
                std::thread::yield_now();
                continue;
            }

            if self.parked {
                self.parked = false;
                self.shared.parked[self.id].store(false, Ordering::Release);
            }

            for slot in 0..self.assigned.len() {
                if self.shared.stop.load(Ordering::Acquire)
                    || self.shared.pause.load(Ordering::Acquire)
                {
                    break;
                }
                let idx = self.assigned[slot];
                if let Err(e) = self.poll_channel(idx) {
                    self.fail(e);
                    break;
                }
            }
        }

        // Park on the way out so rendezvous loops terminate.
        self.shared.parked[self.id].store(true, Ordering::Release);
        tracing::debug!(worker = self.id, samples = self.stats.len(), "worker down");
        self.stats
    }

    fn poll_channel(&mut self, idx: usize) -> Result<()> {
        let decoded = {
            let mut ch = self.shared.channels[idx].lock();
            let decoded = match ch.begin_read()? {
                ReadStatus::WouldBlock => return Ok(()),
                ReadStatus::StreamEnded => {
                    return Err(Error::StreamEnded(self.shared.ids[idx]))
                }
                ReadStatus::Ready(data) => Message::decode(data),
            };
            ch.end_read();
            decoded
        };
        let msg = decoded?;

        let participants = self.shared.scoreboard.len() as i16;
        if msg.source_id < 1 || msg.source_id > participants {
            tracing::warn!(
                source = msg.source_id,
                kind = %msg.kind,
                "ignoring response with out-of-range source id"
            );
            return Ok(());
        }

        tracing::trace!(
            worker = self.id,
            participant = msg.source_id,
            kind = %msg.kind,
            "response collected"
        );

        self.shared.scoreboard.record(msg.source_id, msg.kind);
        self.shared.counters.bump(self.id);
        self.stats.push(Sample {
            participant: msg.source_id,
            client_rtos: msg.client_rto,
            server_rtos: msg.server_rto,
            start_us: msg.timestamp_us,
            end_us: now_micros(),
            kind: msg.kind,
        })
    }

    fn fail(&self, e: Error) {
        tracing::error!(worker = self.id, error = %e, "worker stopping on fatal error");
        let mut fatal = self.shared.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(e);
        }
        self.shared.stop.store(true, Ordering::Release);
    }
}
