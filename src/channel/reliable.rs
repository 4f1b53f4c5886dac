//! Reliable delivery over an unreliable datagram channel.
//!
//! Each outbound datagram is prefixed with an 8-byte little-endian sequence
//! number. Acknowledgements are piggybacked: there is no separate ack packet,
//! a peer acknowledges by advancing its own sequence number past the one we
//! have in flight. The two endpoints run asymmetric halves of the scheme:
//!
//! - [`Role::Responder`] accepts only the exact sequence it expects and then
//!   increments it. Duplicates and reordered datagrams never surface.
//! - [`Role::Initiator`] accepts any strictly greater sequence and adopts it,
//!   tolerating gaps left by lost responder retransmissions.
//!
//! Retransmission lives in `end_write`: while the in-flight message is
//! unacknowledged, each call polls the inbound side (an accepted datagram is
//! both the ack and a payload, queued for the next `begin_read`), then checks
//! the retransmission timeout, bumps this side's retry counter inside the
//! already-encoded payload, resends, and reports [`WriteStatus::RtoFired`] so
//! the caller can count the retry against its cap.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{Channel, ReadStatus, WriteStatus, BUF_SIZE};
use crate::error::Result;
use crate::protocol::{bump_client_rto, bump_server_rto};

/// Bytes of sequence-number prefix on every datagram.
pub const SEQ_PREFIX: usize = 8;

/// Which half of the sequence scheme this endpoint runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Coordinator side: accepts strictly greater sequences, starts at -1.
    Initiator,
    /// Participant side: accepts exact-match sequences, starts at 0.
    Responder,
}

enum Inbound {
    Accepted,
    WouldBlock,
    StreamEnded,
}

/// Sequence-and-retransmit wrapper around a datagram channel.
pub struct Reliable<C: Channel> {
    inner: C,
    role: Role,
    rto: Duration,
    /// Responder: next sequence expected (and stamped on sends).
    /// Initiator: highest sequence accepted (and stamped on sends).
    seq: i64,
    /// Staged outbound datagram: sequence prefix plus encoded payload.
    staged: Vec<u8>,
    /// Total staged bytes for the in-flight message.
    staged_len: usize,
    /// Sequence value recorded when the in-flight message first hit the wire.
    inflight_seq: i64,
    /// Wire time of the most recent (re)transmission.
    sent_at: Instant,
    /// An in-flight message is awaiting its piggybacked ack.
    ack_outstanding: bool,
    /// Accepted inbound payloads, queued until consumed via begin_read.
    pending: VecDeque<Vec<u8>>,
}

impl<C: Channel> Reliable<C> {
    /// Wrap a datagram channel with the given role and retransmission timeout.
    pub fn new(inner: C, role: Role, rto: Duration) -> Self {
        Self {
            inner,
            role,
            rto,
            seq: match role {
                Role::Initiator => -1,
                Role::Responder => 0,
            },
            staged: vec![0u8; BUF_SIZE],
            staged_len: 0,
            inflight_seq: 0,
            sent_at: Instant::now(),
            ack_outstanding: false,
            pending: VecDeque::new(),
        }
    }

    /// Pull one datagram from the inner channel and run the acceptance rule.
    /// A rejected datagram is consumed and reported as `WouldBlock`.
    fn poll_inbound(&mut self) -> Result<Inbound> {
        let accepted;
        match self.inner.begin_read()? {
            ReadStatus::WouldBlock => return Ok(Inbound::WouldBlock),
            ReadStatus::StreamEnded => return Ok(Inbound::StreamEnded),
            ReadStatus::Ready(datagram) => {
                if datagram.len() < SEQ_PREFIX {
                    tracing::warn!(len = datagram.len(), "dropping runt datagram");
                    accepted = false;
                } else {
                    let mut prefix = [0u8; SEQ_PREFIX];
                    prefix.copy_from_slice(&datagram[..SEQ_PREFIX]);
                    let seq = i64::from_le_bytes(prefix);

                    let accept = match self.role {
                        Role::Responder => seq == self.seq,
                        Role::Initiator => seq > self.seq,
                    };
                    if accept {
                        match self.role {
                            Role::Responder => self.seq += 1,
                            Role::Initiator => self.seq = seq,
                        }
                        self.pending.push_back(datagram[SEQ_PREFIX..].to_vec());
                        accepted = true;
                    } else {
                        tracing::debug!(
                            got = seq,
                            expected = self.seq,
                            role = ?self.role,
                            "dropping out-of-sequence datagram"
                        );
                        accepted = false;
                    }
                }
            }
        }
        self.inner.end_read();

        Ok(if accepted {
            Inbound::Accepted
        } else {
            Inbound::WouldBlock
        })
    }

    /// Copy the staged datagram into the inner channel and commit it.
    fn send_staged(&mut self) -> Result<WriteStatus> {
        let total = self.staged_len;
        let buf = self.inner.begin_write();
        buf[..total].copy_from_slice(&self.staged[..total]);
        self.inner.end_write(total)
    }
}

impl<C: Channel> Channel for Reliable<C> {
    fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
        if self.pending.is_empty() {
            match self.poll_inbound()? {
                Inbound::Accepted => {}
                Inbound::WouldBlock => return Ok(ReadStatus::WouldBlock),
                Inbound::StreamEnded => return Ok(ReadStatus::StreamEnded),
            }
        }
        match self.pending.front() {
            Some(payload) => Ok(ReadStatus::Ready(payload)),
            None => Ok(ReadStatus::WouldBlock),
        }
    }

    fn end_read(&mut self) {
        self.pending.pop_front();
    }

    fn begin_write(&mut self) -> &mut [u8] {
        // Stamp the current sequence; the payload goes after the prefix.
        self.staged[..SEQ_PREFIX].copy_from_slice(&self.seq.to_le_bytes());
        &mut self.staged[SEQ_PREFIX..]
    }

    fn end_write(&mut self, len: usize) -> Result<WriteStatus> {
        let total = len + SEQ_PREFIX;
        assert!(
            total <= self.staged.len(),
            "write of {} bytes exceeds channel capacity {}",
            len,
            self.staged.len() - SEQ_PREFIX
        );

        if !self.ack_outstanding {
            self.staged_len = total;
            match self.send_staged()? {
                WriteStatus::Committed => {
                    self.inflight_seq = self.seq;
                    self.sent_at = Instant::now();
                    self.ack_outstanding = true;
                }
                WriteStatus::StreamEnded => return Ok(WriteStatus::StreamEnded),
                other => return Ok(other),
            }
        }

        // The ack is the peer's next message; consume it here so a caller
        // driving end_write alone still completes. The payload queues up for
        // the next begin_read.
        if let Inbound::StreamEnded = self.poll_inbound()? {
            return Ok(WriteStatus::StreamEnded);
        }

        if self.seq != self.inflight_seq {
            self.ack_outstanding = false;
            return Ok(WriteStatus::Committed);
        }

        if self.sent_at.elapsed() < self.rto {
            return Ok(WriteStatus::WouldBlock);
        }

        // Timed out: bump this side's retry counter inside the encoded
        // payload and retransmit.
        let payload = &mut self.staged[SEQ_PREFIX..self.staged_len];
        match self.role {
            Role::Responder => bump_client_rto(payload),
            Role::Initiator => bump_server_rto(payload),
        }
        if let WriteStatus::StreamEnded = self.send_staged()? {
            return Ok(WriteStatus::StreamEnded);
        }
        self.sent_at = Instant::now();
        Ok(WriteStatus::RtoFired)
    }
}
