//! Commit participant - answers the coordinator's rounds.
//!
//! A participant dials the coordinator, announces itself with a `Connect`
//! message and then serves rounds: receive a `Request`, consult its
//! [`VotePolicy`], send the vote, wait for the decision and acknowledge it.
//! The decision wait is bounded; a coordinator that goes quiet mid-round is
//! a fatal [`Error::Timeout`].

use std::time::{Duration, Instant};

use crate::channel::{drive_write, BoxedChannel, Channel, ReadStatus};
use crate::config::ParticipantConfig;
use crate::coordinator::COORDINATOR_ID;
use crate::error::{Error, Result};
use crate::protocol::{Message, MsgKind, WIRE_SIZE};
use crate::transport::Transport;

/// How a round ended on this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The coordinator committed the round.
    Committed,
    /// The coordinator cancelled the round.
    Aborted,
}

/// Decides each round's vote. `true` is a yes.
pub trait VotePolicy: Send {
    fn vote(&mut self, round: u64) -> bool;
}

/// Default policy: votes no once every `period` rounds, offset by the
/// participant id so dissent rotates through the cluster instead of piling
/// onto the same rounds.
pub struct RotatingDissent {
    period: u64,
    counter: u64,
}

impl RotatingDissent {
    pub const DEFAULT_PERIOD: u64 = 5;

    pub fn new(id: i16) -> Self {
        Self::with_period(id, Self::DEFAULT_PERIOD)
    }

    pub fn with_period(id: i16, period: u64) -> Self {
        Self {
            period: period.max(1),
            counter: id.max(0) as u64,
        }
    }
}

impl VotePolicy for RotatingDissent {
    fn vote(&mut self, _round: u64) -> bool {
        self.counter += 1;
        self.counter % self.period != 0
    }
}

/// Always votes yes.
pub struct AlwaysYes;

impl VotePolicy for AlwaysYes {
    fn vote(&mut self, _round: u64) -> bool {
        true
    }
}

/// Always votes no.
pub struct AlwaysNo;

impl VotePolicy for AlwaysNo {
    fn vote(&mut self, _round: u64) -> bool {
        false
    }
}

/// Pause between redials while the coordinator is still coming up.
const REDIAL_DELAY: Duration = Duration::from_millis(50);

pub struct Participant<P: VotePolicy> {
    cfg: ParticipantConfig,
    channel: BoxedChannel,
    policy: P,
    msg_len: usize,
    rounds: u64,
}

impl<P: VotePolicy> Participant<P> {
    /// Dial the coordinator (redialing while it is not up yet) and announce
    /// this participant. The announcement retries without a cap: before the
    /// first round there is no cluster to fail.
    pub fn connect(cfg: ParticipantConfig, transport: &Transport, policy: P) -> Result<Self> {
        cfg.validate()?;
        let msg_len = cfg.base.effective_msg_size();

        let channel = loop {
            match transport.client(cfg.server, cfg.base.port, cfg.id) {
                Ok(ch) => break ch,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    tracing::debug!("coordinator not up yet, redialing");
                    std::thread::sleep(REDIAL_DELAY);
                }
                Err(e) => return Err(e),
            }
        };

        let mut participant = Self {
            cfg,
            channel,
            policy,
            msg_len,
            rounds: 0,
        };
        let hello = Message::new(MsgKind::Connect, participant.cfg.id);
        participant.send(&hello, u64::MAX)?;
        tracing::info!(id = participant.cfg.id, "announced to the coordinator");
        Ok(participant)
    }

    /// Rounds served so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Serve one round.
    pub fn run_round(&mut self) -> Result<Decision> {
        // A request may be arbitrarily far away; wait without a deadline.
        let request = self.await_message(None)?;
        if request.kind != MsgKind::Request {
            return Err(Error::Protocol(format!(
                "expected a request, got {}",
                request.kind
            )));
        }

        self.rounds += 1;
        let yes = self.policy.vote(self.rounds);
        let vote_kind = if yes { MsgKind::VoteYes } else { MsgKind::VoteNo };
        // Votes and acks echo the request's timing and retry fields so the
        // coordinator can measure the full round trip.
        let vote = Message::reply_to(vote_kind, self.cfg.id, &request);
        self.send(&vote, self.cfg.base.retry_cap)?;

        let deadline = Instant::now() + self.cfg.base.round_timeout;
        let decision = self.await_message(Some(deadline))?;
        let outcome = match decision.kind {
            MsgKind::Commit => Decision::Committed,
            MsgKind::Cancel => Decision::Aborted,
            other => {
                return Err(Error::Protocol(format!(
                    "expected a decision, got {}",
                    other
                )))
            }
        };

        let ack = Message::reply_to(MsgKind::Ack, self.cfg.id, &decision);
        self.send(&ack, self.cfg.base.retry_cap)?;

        tracing::debug!(round = self.rounds, voted_yes = yes, outcome = ?outcome, "round served");
        Ok(outcome)
    }

    /// Serve rounds until the limit (or forever with `None`).
    pub fn run(&mut self, rounds: Option<u64>) -> Result<()> {
        loop {
            if let Some(limit) = rounds {
                if self.rounds >= limit {
                    tracing::info!(rounds = self.rounds, "round limit reached");
                    return Ok(());
                }
            }
            self.run_round()?;
        }
    }

    fn send(&mut self, msg: &Message, cap: u64) -> Result<()> {
        let buf = self.channel.begin_write();
        msg.encode_into(buf);
        buf[WIRE_SIZE..self.msg_len].fill(0);
        drive_write(&mut self.channel, self.msg_len, cap, COORDINATOR_ID)
    }

    fn await_message(&mut self, deadline: Option<Instant>) -> Result<Message> {
        loop {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(Error::Timeout("a coordinator message"));
                }
            }
            let decoded = match self.channel.begin_read()? {
                ReadStatus::WouldBlock => {
                    std::thread::yield_now();
                    continue;
                }
                ReadStatus::StreamEnded => return Err(Error::StreamEnded(COORDINATOR_ID)),
                ReadStatus::Ready(data) => Message::decode(data),
            };
            self.channel.end_read();
            return decoded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotating_dissent_votes_no_once_per_period() {
        let mut policy = RotatingDissent::with_period(0, 5);
        let votes: Vec<bool> = (1..=10).map(|r| policy.vote(r)).collect();
        let nays = votes.iter().filter(|v| !**v).count();
        assert_eq!(nays, 2);
        // Counter seeded at 0: the no lands every fifth vote.
        assert!(!votes[4]);
        assert!(!votes[9]);
    }

    #[test]
    fn test_rotating_dissent_offset_by_id() {
        let mut a = RotatingDissent::with_period(1, 5);
        let mut b = RotatingDissent::with_period(2, 5);
        let a_votes: Vec<bool> = (1..=5).map(|r| a.vote(r)).collect();
        let b_votes: Vec<bool> = (1..=5).map(|r| b.vote(r)).collect();
        // Different ids dissent on different rounds.
        assert_ne!(a_votes, b_votes);
        assert_eq!(a_votes.iter().filter(|v| !**v).count(), 1);
        assert_eq!(b_votes.iter().filter(|v| !**v).count(), 1);
    }

    #[test]
    fn test_fixed_policies() {
        assert!(AlwaysYes.vote(1));
        assert!(!AlwaysNo.vote(1));
    }
}
