//! Two-phase-commit coordination engine over pluggable non-blocking
//! transports.
//!
//! One coordinator drives voting rounds against N participants. All traffic
//! is a single 16-byte message record, carried over TCP (with fixed-size
//! framing), raw UDP, or UDP with a reliable-delivery layer. Every channel
//! obeys the same four-operation non-blocking contract, so the engine never
//! blocks in the kernel and the same round logic runs over any transport.
//!
//! The pieces:
//! - [`protocol`]: the wire record and message kinds.
//! - [`channel`]: the channel contract plus the framing and reliability
//!   wrappers.
//! - [`transport`]: socket transports and the channel factory.
//! - [`coordinator`]: the round state machine, worker pool and scoreboard.
//! - [`participant`]: the answering side and its vote policies.
//! - [`stats`]: per-response latency collection.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod participant;
pub mod protocol;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
