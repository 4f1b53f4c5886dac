//! Error types for commitwire.

use thiserror::Error;

/// Main error type for all commitwire operations.
///
/// Transient conditions (would-block, RTO fired) and orderly stream end are
/// *not* errors: they travel through [`ReadStatus`](crate::channel::ReadStatus)
/// and [`WriteStatus`](crate::channel::WriteStatus). Everything here is a
/// genuine fault that ends the run.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (unexpected message kind, bad wire data, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A peer closed its stream; the run cannot continue without it.
    #[error("Stream ended on connection to participant {0}")]
    StreamEnded(i16),

    /// Retransmission retry cap exceeded while writing to a participant.
    #[error("Retry cap ({cap}) exceeded on connection to participant {participant}")]
    RetryCapExceeded { participant: i16, cap: u64 },

    /// Quorum was not reached before the timeout/retry budget ran out.
    #[error("Cluster failed: {0}")]
    ClusterFailed(String),

    /// A pre-sized statistics buffer filled up mid-run.
    #[error("Statistics buffer exhausted on worker {0}")]
    StatsExhausted(usize),

    /// A deadline passed while waiting for a message.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using commitwire's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
