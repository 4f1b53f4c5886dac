//! Commit coordinator - drives two-phase rounds against the cluster.
//!
//! The control thread owns the round state machine; worker threads own
//! response collection. They share the participant channels (mutex-guarded,
//! workers read and the control thread writes), a lock-free scoreboard and
//! per-worker response counters. Phase boundaries are enforced by a park
//! rendezvous: the control thread raises the pause flag and waits for every
//! worker's parked flag before it reads the scoreboard or resets state, so a
//! worker can never publish into a phase that is already being classified.
//!
//! One round:
//! 1. reset the scoreboard, broadcast `Request`, release the workers
//! 2. wait until every participant answered or the round timeout passes
//! 3. park the workers, classify the votes
//! 4. broadcast `Commit` (all voted yes) or `Cancel` (someone voted no),
//!    collect acks the same way
//!
//! A participant that stayed silent through the timeout makes the round a
//! cluster failure, which outranks any `VoteNo`.

mod scoreboard;
mod worker;

pub use scoreboard::{ResponseCounters, Scoreboard};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::channel::{drive_write, BoxedChannel, Channel, ReadStatus};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::protocol::{Message, MsgKind, WIRE_SIZE};
use crate::stats::{write_report_to_path, StatsBuffer};
use crate::transport::Transport;

use worker::Worker;

/// Source id the coordinator stamps on its own messages.
pub const COORDINATOR_ID: i16 = -1;

/// How a finished round went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Every participant voted yes and acknowledged the commit.
    CommitSucceeded,
    /// At least one participant voted no; the cancel was acknowledged.
    CommitFailed,
    /// A participant fell silent; the cluster cannot make progress.
    ClusterFailed,
}

impl std::fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RoundOutcome::CommitSucceeded => "commit succeeded",
            RoundOutcome::CommitFailed => "commit failed",
            RoundOutcome::ClusterFailed => "cluster failed",
        })
    }
}

enum VoteTally {
    AllYes,
    SomeNo,
    Lost,
}

/// State shared between the control thread and the workers.
pub(crate) struct Shared {
    pub(crate) scoreboard: Scoreboard,
    pub(crate) counters: ResponseCounters,
    /// Channel per participant, in accept order.
    pub(crate) channels: Vec<Arc<Mutex<BoxedChannel>>>,
    /// Participant id per channel, from its connect announcement.
    pub(crate) ids: Vec<i16>,
    pub(crate) stop: AtomicBool,
    pub(crate) pause: AtomicBool,
    pub(crate) parked: Vec<AtomicBool>,
    /// First fatal worker error, surfaced to the control thread.
    pub(crate) fatal: Mutex<Option<Error>>,
}

pub struct Coordinator {
    cfg: CoordinatorConfig,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<StatsBuffer>>,
    msg_len: usize,
    rounds_done: u64,
}

impl Coordinator {
    /// Bind the transport, wait for every participant to announce itself and
    /// spawn the workers (parked).
    pub fn new(cfg: CoordinatorConfig, transport: &Transport) -> Result<Self> {
        cfg.validate()?;
        let msg_len = cfg.base.effective_msg_size();

        let mut server = transport.server(cfg.bind, cfg.base.port, cfg.participants)?;

        tracing::info!(
            participants = cfg.participants,
            transport = %transport.kind(),
            "waiting for the cluster to assemble"
        );

        let mut pending: Vec<BoxedChannel> = Vec::new();
        let mut ready: Vec<(i16, BoxedChannel)> = Vec::new();
        while ready.len() < cfg.participants {
            if let Some(ch) = server.poll_accept()? {
                pending.push(ch);
            }
            let mut i = 0;
            while i < pending.len() {
                match try_take_connect(&mut pending[i])? {
                    Some(id) => {
                        tracing::info!(participant = id, "participant connected");
                        let ch = pending.swap_remove(i);
                        ready.push((id, ch));
                    }
                    None => i += 1,
                }
            }
            std::thread::yield_now();
        }

        let (ids, channels): (Vec<i16>, Vec<Arc<Mutex<BoxedChannel>>>) = ready
            .into_iter()
            .map(|(id, ch)| (id, Arc::new(Mutex::new(ch))))
            .unzip();

        let workers = cfg.workers.min(cfg.participants);
        let shared = Arc::new(Shared {
            scoreboard: Scoreboard::new(cfg.participants),
            counters: ResponseCounters::new(workers),
            channels,
            ids,
            stop: AtomicBool::new(false),
            // Workers start parked; the first round releases them.
            pause: AtomicBool::new(true),
            parked: (0..workers).map(|_| AtomicBool::new(false)).collect(),
            fatal: Mutex::new(None),
        });

        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            // Channels are dealt round-robin across workers.
            let assigned: Vec<usize> = (0..cfg.participants)
                .filter(|idx| idx % workers == w)
                .collect();
            let worker = Worker::new(w, Arc::clone(&shared), assigned, cfg.base.stats_len);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("collector-{}", w))
                    .spawn(move || worker.run())?,
            );
        }

        tracing::info!(workers, "cluster assembled");
        Ok(Self {
            cfg,
            shared,
            handles,
            msg_len,
            rounds_done: 0,
        })
    }

    /// Drive one full round. Workers must be parked on entry and are parked
    /// again on return.
    pub fn run_round(&mut self) -> Result<RoundOutcome> {
        self.run_phase(MsgKind::Request)?;
        let tally = self.tally_votes()?;

        let outcome = match tally {
            VoteTally::Lost => {
                tracing::warn!("vote phase lost a participant");
                return Ok(RoundOutcome::ClusterFailed);
            }
            VoteTally::AllYes => {
                self.run_phase(MsgKind::Commit)?;
                if self.all_acked() {
                    RoundOutcome::CommitSucceeded
                } else {
                    RoundOutcome::ClusterFailed
                }
            }
            VoteTally::SomeNo => {
                self.run_phase(MsgKind::Cancel)?;
                if self.all_acked() {
                    RoundOutcome::CommitFailed
                } else {
                    RoundOutcome::ClusterFailed
                }
            }
        };

        self.rounds_done += 1;
        tracing::debug!(round = self.rounds_done, outcome = %outcome, "round finished");
        Ok(outcome)
    }

    /// Drive rounds until the configured count (or a fatal error). A cluster
    /// failure is terminal: it becomes the returned error.
    pub fn run(&mut self) -> Result<()> {
        let mut window_start = Instant::now();
        let mut window_rounds: u64 = 0;

        loop {
            if let Some(limit) = self.cfg.rounds {
                if self.rounds_done >= limit {
                    tracing::info!(rounds = self.rounds_done, "round limit reached");
                    return Ok(());
                }
            }

            match self.run_round()? {
                RoundOutcome::CommitSucceeded | RoundOutcome::CommitFailed => {}
                RoundOutcome::ClusterFailed => {
                    return Err(Error::ClusterFailed(
                        "a participant stopped responding".into(),
                    ));
                }
            }

            window_rounds += 1;
            if window_rounds == self.cfg.base.report_interval {
                let elapsed = window_start.elapsed().as_secs_f64();
                tracing::info!(
                    rounds = self.rounds_done,
                    rate = format_args!("{:.0} rounds/s", window_rounds as f64 / elapsed),
                    "progress"
                );
                window_start = Instant::now();
                window_rounds = 0;
            }
        }
    }

    /// Stop the workers, join them and write the latency report.
    pub fn shutdown(mut self) -> Result<Vec<StatsBuffer>> {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.pause.store(false, Ordering::Release);

        let mut buffers = Vec::with_capacity(self.handles.len());
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(buf) => buffers.push(buf),
                Err(_) => tracing::error!("a worker panicked; its samples are lost"),
            }
        }

        write_report_to_path(&self.cfg.stats_path, &buffers)?;
        tracing::info!(path = %self.cfg.stats_path.display(), "latency report written");
        Ok(buffers)
    }

    /// Broadcast, release the workers, wait for responses, park the workers.
    fn run_phase(&mut self, kind: MsgKind) -> Result<()> {
        self.pause_workers();
        self.take_fatal()?;
        self.shared.scoreboard.reset();
        self.broadcast(kind)?;
        self.resume_workers();

        let deadline = Instant::now() + self.cfg.base.round_timeout;
        let wanted = self.cfg.participants as u64;
        while self.shared.counters.total() < wanted
            && !self.shared.stop.load(Ordering::Acquire)
            && Instant::now() < deadline
        {
            std::thread::yield_now();
        }

        self.pause_workers();
        self.take_fatal()
    }

    /// Send one message to every participant, driving each write through its
    /// retransmissions. Only called while the workers are parked.
    fn broadcast(&self, kind: MsgKind) -> Result<()> {
        let msg = Message::new(kind, COORDINATOR_ID);
        for (idx, entry) in self.shared.channels.iter().enumerate() {
            let peer = self.shared.ids[idx];
            let mut ch = entry.lock();
            let buf = ch.begin_write();
            msg.encode_into(buf);
            buf[WIRE_SIZE..self.msg_len].fill(0);
            drive_write(&mut *ch, self.msg_len, self.cfg.base.retry_cap, peer)?;
        }
        tracing::trace!(kind = %kind, "broadcast complete");
        Ok(())
    }

    /// Raise the pause flag and wait until every worker is parked.
    fn pause_workers(&self) {
        self.shared.pause.store(true, Ordering::Release);
        for flag in &self.shared.parked {
            // A stopping worker parks on exit, so this always terminates.
            while !flag.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        }
    }

    /// Drop the pause flag and wait until every worker has actually woken,
    /// so a later rendezvous cannot mistake a stale parked flag for a fresh
    /// one.
    fn resume_workers(&self) {
        self.shared.pause.store(false, Ordering::Release);
        for flag in &self.shared.parked {
            while flag.load(Ordering::Acquire) && !self.shared.stop.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        }
    }

    fn take_fatal(&self) -> Result<()> {
        match self.shared.fatal.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn tally_votes(&self) -> Result<VoteTally> {
        classify_votes(&self.shared.scoreboard)
    }

    fn all_acked(&self) -> bool {
        classify_acks(&self.shared.scoreboard)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.pause.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Poll one pending channel for its connect announcement.
fn try_take_connect(ch: &mut BoxedChannel) -> Result<Option<i16>> {
    let decoded = match ch.begin_read()? {
        ReadStatus::WouldBlock => return Ok(None),
        ReadStatus::StreamEnded => {
            return Err(Error::Protocol("peer disconnected during setup".into()))
        }
        ReadStatus::Ready(data) => Message::decode(data),
    };
    ch.end_read();
    let msg = decoded?;

    if msg.kind != MsgKind::Connect {
        tracing::warn!(kind = %msg.kind, "expected a connect announcement, ignoring");
        return Ok(None);
    }
    Ok(Some(msg.source_id))
}

/// Vote classification. A lost participant outranks a no vote: a `VoteNo`
/// still lets the round finish with a cancel, while silence means the cluster
/// is broken. Any other kind during voting is a protocol violation.
fn classify_votes(board: &Scoreboard) -> Result<VoteTally> {
    let mut lost = false;
    let mut no = false;
    for (id, kind) in board.iter() {
        match kind {
            MsgKind::VoteYes => {}
            MsgKind::VoteNo => no = true,
            MsgKind::Lost => lost = true,
            other => {
                return Err(Error::Protocol(format!(
                    "participant {} sent {} during the vote phase",
                    id, other
                )))
            }
        }
    }
    Ok(if lost {
        VoteTally::Lost
    } else if no {
        VoteTally::SomeNo
    } else {
        VoteTally::AllYes
    })
}

/// Ack classification: anything other than a full house of acks is a cluster
/// failure.
fn classify_acks(board: &Scoreboard) -> bool {
    let mut all = true;
    for (id, kind) in board.iter() {
        match kind {
            MsgKind::Ack => {}
            MsgKind::Lost => {
                tracing::warn!(participant = id, "no ack before the timeout");
                all = false;
            }
            other => {
                tracing::warn!(participant = id, kind = %other, "unexpected reply instead of an ack");
                all = false;
            }
        }
    }
    all
}
