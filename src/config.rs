//! Runtime configuration for both ends of the cluster.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{BUF_SIZE, SEQ_PREFIX};
use crate::error::{Error, Result};
use crate::protocol::WIRE_SIZE;

/// Default protocol port. Datagram transports additionally claim
/// `port + participant_id` per participant.
pub const DEFAULT_PORT: u16 = 7331;

/// Default on-wire message size floor in bytes.
pub const DEFAULT_MSG_SIZE: usize = 128;

/// Default retransmission timeout for the reliable datagram transport.
pub const DEFAULT_RTO: Duration = Duration::from_millis(200);

/// Default per-phase vote collection timeout.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-worker statistics buffer length, in samples.
pub const DEFAULT_STATS_LEN: usize = 1000;

/// Default throughput report interval, in rounds.
pub const DEFAULT_REPORT_INTERVAL: u64 = 100;

/// Default cap on consecutive retransmissions of one message.
pub const DEFAULT_RETRY_CAP: u64 = 200_000;

/// Settings shared by the coordinator and every participant. Both ends must
/// agree on the transport, port and message size.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Requested message size; the wire uses [`Config::effective_msg_size`].
    pub msg_size: usize,
    pub rto: Duration,
    pub round_timeout: Duration,
    pub stats_len: usize,
    pub report_interval: u64,
    pub retry_cap: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            msg_size: DEFAULT_MSG_SIZE,
            rto: DEFAULT_RTO,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            stats_len: DEFAULT_STATS_LEN,
            report_interval: DEFAULT_REPORT_INTERVAL,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }
}

impl Config {
    /// On-wire message size: the requested size, but never smaller than the
    /// record itself. Messages are padded up to this and the pad is ignored.
    pub fn effective_msg_size(&self) -> usize {
        self.msg_size.max(WIRE_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        let effective = self.effective_msg_size();
        if effective > BUF_SIZE - SEQ_PREFIX {
            return Err(Error::Config(format!(
                "message size {} exceeds the channel buffer ({} max)",
                effective,
                BUF_SIZE - SEQ_PREFIX
            )));
        }
        if self.stats_len == 0 {
            return Err(Error::Config("stats buffer length must be nonzero".into()));
        }
        if self.report_interval == 0 {
            return Err(Error::Config("report interval must be nonzero".into()));
        }
        if self.retry_cap == 0 {
            return Err(Error::Config("retry cap must be nonzero".into()));
        }
        Ok(())
    }
}

/// Coordinator-side settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub base: Config,
    /// Cluster size, excluding the coordinator itself.
    pub participants: usize,
    /// Worker threads collecting responses. Capped at the participant count.
    pub workers: usize,
    pub bind: IpAddr,
    /// Rounds to drive before shutting down; `None` runs until a fatal error.
    pub rounds: Option<u64>,
    /// Where the latency report lands on shutdown.
    pub stats_path: PathBuf,
}

impl CoordinatorConfig {
    pub fn new(participants: usize, workers: usize) -> Self {
        Self {
            base: Config::default(),
            participants,
            workers,
            bind: IpAddr::from([0, 0, 0, 0]),
            rounds: None,
            stats_path: PathBuf::from("/tmp/commitwire.stats"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.participants == 0 {
            return Err(Error::Config("cluster needs at least one participant".into()));
        }
        if self.participants > i16::MAX as usize {
            return Err(Error::Config(format!(
                "participant count {} exceeds the id space",
                self.participants
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("coordinator needs at least one worker".into()));
        }
        Ok(())
    }
}

/// Participant-side settings.
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    pub base: Config,
    /// This participant's identity, 1-based.
    pub id: i16,
    /// Coordinator address.
    pub server: IpAddr,
}

impl ParticipantConfig {
    pub fn new(id: i16, server: IpAddr) -> Self {
        Self {
            base: Config::default(),
            id,
            server,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.id < 1 {
            return Err(Error::Config(format!(
                "participant id must be >= 1, got {}",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(CoordinatorConfig::new(3, 2).validate().is_ok());
        assert!(ParticipantConfig::new(1, IpAddr::from([127, 0, 0, 1]))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_effective_msg_size_floors_at_record_size() {
        let mut cfg = Config::default();
        cfg.msg_size = 4;
        assert_eq!(cfg.effective_msg_size(), WIRE_SIZE);
        cfg.msg_size = 128;
        assert_eq!(cfg.effective_msg_size(), 128);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut cfg = Config::default();
        cfg.msg_size = BUF_SIZE;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_cluster_shapes_rejected() {
        assert!(CoordinatorConfig::new(0, 1).validate().is_err());
        assert!(CoordinatorConfig::new(3, 0).validate().is_err());
        assert!(ParticipantConfig::new(0, IpAddr::from([127, 0, 0, 1]))
            .validate()
            .is_err());
    }
}
