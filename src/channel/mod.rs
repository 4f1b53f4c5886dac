//! Message channel abstraction - the four-operation non-blocking contract
//! shared by all transports.
//!
//! A [`Channel`] delivers and accepts whole logical messages without ever
//! blocking. Callers poll in a tight loop: a read that has nothing to hand
//! over reports [`ReadStatus::WouldBlock`], a write that cannot complete yet
//! reports [`WriteStatus::WouldBlock`] (or [`WriteStatus::RtoFired`] on
//! transports with retransmission), and the caller simply tries again.
//! Genuine faults travel through [`crate::error::Error`]; orderly peer
//! shutdown is the `StreamEnded` status, not an error.
//!
//! Two wrappers build richer disciplines out of raw transports:
//! - [`Framed`] delimits variable-chunk byte streams into messages.
//! - [`Reliable`] adds sequence numbers and RTO retransmission on top of an
//!   unreliable datagram channel.

mod framing;
mod reliable;

pub use framing::{fixed_size_delimiter, Delimiter, Framed};
pub use reliable::{Reliable, Role, SEQ_PREFIX};

use crate::error::Result;

/// Default I/O buffer capacity for concrete channels (64KB).
pub const BUF_SIZE: usize = 64 * 1024;

/// Outcome of a non-blocking read attempt.
#[derive(Debug)]
pub enum ReadStatus<'a> {
    /// Exactly one logical message's worth of bytes, valid until `end_read`.
    Ready(&'a [u8]),
    /// No complete message available yet; poll again later.
    WouldBlock,
    /// The peer closed the connection; no further reads will succeed.
    StreamEnded,
}

/// Outcome of a non-blocking write commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The message was handed to the transport.
    Committed,
    /// The write cannot complete yet; call `end_write` again with the same
    /// length to keep driving it.
    WouldBlock,
    /// A retransmission timeout fired and the message was resent. The caller
    /// should count a retry and keep calling `end_write`.
    RtoFired,
    /// The peer closed the connection; no further writes will succeed.
    StreamEnded,
}

/// Non-blocking message channel over some transport.
///
/// # Contract
///
/// - `end_read` must be called exactly once per successful `begin_read`
///   before the next read is attempted.
/// - The length passed to `end_write` must never exceed the capacity of the
///   buffer returned by `begin_write`; violating this is a fatal internal
///   error (buffer-overflow guard) and panics.
/// - After `WouldBlock` or `RtoFired` from `end_write`, the caller must call
///   `end_write` again with the same length - the channel retains the staged
///   message and the repeated call drives its internal state machine.
pub trait Channel {
    /// Attempt to read one logical message.
    fn begin_read(&mut self) -> Result<ReadStatus<'_>>;

    /// Release the buffer returned by the last successful `begin_read`.
    fn end_read(&mut self);

    /// Borrow the write staging buffer. Always succeeds while the channel is
    /// open; the caller encodes its message at the front of the buffer.
    fn begin_write(&mut self) -> &mut [u8];

    /// Commit `len` bytes of the staging buffer to the transport.
    fn end_write(&mut self, len: usize) -> Result<WriteStatus>;
}

/// Drive a staged write to completion, spinning through `WouldBlock` and
/// counting retransmissions against `cap`. `peer` labels the far end in
/// errors. The cap check precedes the count, so the fatal error fires on the
/// retransmission after the cap-th one.
pub fn drive_write(ch: &mut impl Channel, len: usize, cap: u64, peer: i16) -> Result<()> {
    let mut retries: u64 = 0;
    loop {
        match ch.end_write(len)? {
            WriteStatus::Committed => return Ok(()),
            WriteStatus::WouldBlock => std::hint::spin_loop(),
            WriteStatus::RtoFired => {
                if retries >= cap {
                    return Err(crate::error::Error::RetryCapExceeded {
                        participant: peer,
                        cap,
                    });
                }
                retries += 1;
            }
            WriteStatus::StreamEnded => return Err(crate::error::Error::StreamEnded(peer)),
        }
    }
}

/// A heap-allocated channel, as handed out by the transport factory.
pub type BoxedChannel = Box<dyn Channel + Send>;

impl Channel for BoxedChannel {
    fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
        (**self).begin_read()
    }

    fn end_read(&mut self) {
        (**self).end_read()
    }

    fn begin_write(&mut self) -> &mut [u8] {
        (**self).begin_write()
    }

    fn end_write(&mut self, len: usize) -> Result<WriteStatus> {
        (**self).end_write(len)
    }
}
