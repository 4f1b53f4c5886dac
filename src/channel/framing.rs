//! Framing wrapper - recovers discrete messages from a byte-stream channel.
//!
//! Stream transports have no message boundaries: one underlying read can
//! return half a message or forty of them (large reads are common with
//! segmentation offload). [`Framed`] accumulates stream bytes in a growable
//! buffer and applies a pluggable [`Delimiter`] to carve complete messages
//! out of it.
//!
//! The hot path is deliberately lazy about memory moves: `end_read` first
//! re-applies the delimiter to the bytes left in place after the consumed
//! message, and only when no further complete message is found does it shift
//! the remainder to the buffer start. When several messages arrive in one
//! stream read this avoids a memmove per message.

use bytes::BytesMut;

use super::{Channel, ReadStatus, WriteStatus};
use crate::error::Result;

/// Length rule: given the accumulated bytes, how long is the next complete
/// message? Returns 0 while no complete message is available.
pub type Delimiter = Box<dyn Fn(&[u8]) -> usize + Send>;

/// Delimiter for fixed-size message records: reports `frame_len` whenever at
/// least that many bytes are buffered, else 0. No partial message ever
/// surfaces.
pub fn fixed_size_delimiter(frame_len: usize) -> Delimiter {
    Box::new(move |buf: &[u8]| if buf.len() >= frame_len { frame_len } else { 0 })
}

/// Default accumulation buffer capacity.
const INITIAL_CAPACITY: usize = 64 * 1024;

enum Fill {
    Ready,
    WouldBlock,
    StreamEnded,
}

/// Byte-stream channel wrapper that yields delimited messages.
///
/// Reads accumulate; writes pass straight through to the underlying channel.
pub struct Framed<C: Channel> {
    inner: C,
    delimiter: Delimiter,
    /// Accumulated stream bytes; grows by doubling.
    buf: BytesMut,
    /// Start of the unconsumed region within `buf`.
    head: usize,
    /// Length of the delimited-but-not-consumed message at `head` (0 = none).
    cached_len: usize,
}

impl<C: Channel> Framed<C> {
    /// Wrap a stream channel with the given delimiter.
    pub fn new(inner: C, delimiter: Delimiter) -> Self {
        Self::with_capacity(inner, delimiter, INITIAL_CAPACITY)
    }

    /// Wrap with a custom initial accumulation capacity.
    pub fn with_capacity(inner: C, delimiter: Delimiter, capacity: usize) -> Self {
        Self {
            inner,
            delimiter,
            buf: BytesMut::with_capacity(capacity.max(1)),
            head: 0,
            cached_len: 0,
        }
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Try to produce a delimited message at `head`, pulling from the
    /// underlying stream if the accumulated bytes are not enough.
    fn fill(&mut self) -> Result<Fill> {
        // Delimit what we already have first.
        let avail = self.buf.len() - self.head;
        if avail > 0 {
            let n = (self.delimiter)(&self.buf[self.head..]);
            if n > 0 && n <= avail {
                self.cached_len = n;
                return Ok(Fill::Ready);
            }
        }

        // Not enough buffered; pull another chunk from the stream.
        match self.inner.begin_read()? {
            ReadStatus::WouldBlock => return Ok(Fill::WouldBlock),
            ReadStatus::StreamEnded => return Ok(Fill::StreamEnded),
            ReadStatus::Ready(chunk) => {
                let len = chunk.len();
                tracing::trace!(len, "framing: pulled stream bytes");
                // buf and inner are disjoint fields; copy then release.
                let needed = self.buf.len() + len;
                if needed > self.buf.capacity() {
                    let mut cap = self.buf.capacity().max(1);
                    while cap < needed {
                        cap *= 2;
                    }
                    tracing::trace!(from = self.buf.capacity(), to = cap, "framing: growing buffer");
                    self.buf.reserve(cap - self.buf.len());
                }
                self.buf.extend_from_slice(chunk);
            }
        }
        self.inner.end_read();

        let avail = self.buf.len() - self.head;
        let n = (self.delimiter)(&self.buf[self.head..]);
        if n > 0 && n <= avail {
            self.cached_len = n;
            return Ok(Fill::Ready);
        }

        // Still incomplete; the caller tries again later.
        Ok(Fill::WouldBlock)
    }
}

impl<C: Channel> Channel for Framed<C> {
    fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
        if self.cached_len == 0 {
            match self.fill()? {
                Fill::Ready => {}
                Fill::WouldBlock => return Ok(ReadStatus::WouldBlock),
                Fill::StreamEnded => return Ok(ReadStatus::StreamEnded),
            }
        }
        let start = self.head;
        Ok(ReadStatus::Ready(&self.buf[start..start + self.cached_len]))
    }

    fn end_read(&mut self) {
        if self.cached_len == 0 {
            return;
        }

        self.head += self.cached_len;
        self.cached_len = 0;

        let remaining = self.buf.len() - self.head;
        if remaining == 0 {
            self.buf.clear();
            self.head = 0;
            return;
        }

        // A stream read can carry many messages; check the leftover in place
        // before paying for a memory move.
        let n = (self.delimiter)(&self.buf[self.head..]);
        if n > 0 && n <= remaining {
            self.cached_len = n;
            return;
        }

        // No further message; compact so the next stream read appends cleanly.
        let head = self.head;
        self.buf.copy_within(head.., 0);
        self.buf.truncate(remaining);
        self.head = 0;
    }

    fn begin_write(&mut self) -> &mut [u8] {
        self.inner.begin_write()
    }

    fn end_write(&mut self, len: usize) -> Result<WriteStatus> {
        self.inner.end_write(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted byte-stream channel: hands out pre-arranged chunks.
    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
        current: Option<Vec<u8>>,
        reads_taken: usize,
        ended: bool,
        write_buf: Vec<u8>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedStream {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                current: None,
                reads_taken: 0,
                ended: false,
                write_buf: vec![0u8; 1024],
                sent: Vec::new(),
            }
        }

        fn ended(mut self) -> Self {
            self.ended = true;
            self
        }
    }

    impl Channel for ScriptedStream {
        fn begin_read(&mut self) -> Result<ReadStatus<'_>> {
            if self.current.is_none() {
                match self.chunks.pop_front() {
                    Some(chunk) => {
                        self.reads_taken += 1;
                        self.current = Some(chunk);
                    }
                    None => {
                        return Ok(if self.ended {
                            ReadStatus::StreamEnded
                        } else {
                            ReadStatus::WouldBlock
                        });
                    }
                }
            }
            Ok(ReadStatus::Ready(self.current.as_deref().unwrap()))
        }

        fn end_read(&mut self) {
            self.current = None;
        }

        fn begin_write(&mut self) -> &mut [u8] {
            &mut self.write_buf
        }

        fn end_write(&mut self, len: usize) -> Result<WriteStatus> {
            self.sent.push(self.write_buf[..len].to_vec());
            Ok(WriteStatus::Committed)
        }
    }

    const MSG: usize = 16;

    /// One message of size MSG filled with `tag`.
    fn msg(tag: u8) -> Vec<u8> {
        vec![tag; MSG]
    }

    fn framed(chunks: Vec<Vec<u8>>) -> Framed<ScriptedStream> {
        Framed::new(ScriptedStream::new(chunks), fixed_size_delimiter(MSG))
    }

    /// Read one message, asserting it is ready, and return a copy.
    fn read_one(f: &mut Framed<ScriptedStream>) -> Vec<u8> {
        let out = match f.begin_read().unwrap() {
            ReadStatus::Ready(data) => data.to_vec(),
            other => panic!("expected Ready, got {:?}", other),
        };
        f.end_read();
        out
    }

    #[test]
    fn test_single_message_single_chunk() {
        let mut f = framed(vec![msg(1)]);
        assert_eq!(read_one(&mut f), msg(1));
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::WouldBlock));
    }

    #[test]
    fn test_message_split_across_chunks() {
        let whole = msg(7);
        let mut f = framed(vec![whole[..5].to_vec(), whole[5..11].to_vec(), whole[11..].to_vec()]);

        // Incomplete after the first two chunks.
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::WouldBlock));
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::WouldBlock));
        assert_eq!(read_one(&mut f), whole);
    }

    #[test]
    fn test_multiple_messages_in_one_chunk_take_one_underlying_read() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&msg(1));
        chunk.extend_from_slice(&msg(2));
        chunk.extend_from_slice(&msg(3));

        let mut f = framed(vec![chunk]);

        assert_eq!(read_one(&mut f), msg(1));
        assert_eq!(read_one(&mut f), msg(2));
        assert_eq!(read_one(&mut f), msg(3));

        // All three came from a single stream read; the delimiter re-applied
        // in end_read, without touching the underlying channel again.
        assert_eq!(f.inner.reads_taken, 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&msg(0xAA));
        bytes.extend_from_slice(&msg(0xBB));
        let chunks: Vec<Vec<u8>> = bytes.iter().map(|b| vec![*b]).collect();

        let mut f = framed(chunks);
        let mut out = Vec::new();
        loop {
            match f.begin_read().unwrap() {
                ReadStatus::Ready(data) => {
                    out.push(data.to_vec());
                    f.end_read();
                }
                ReadStatus::WouldBlock => {
                    if f.inner.chunks.is_empty() && f.buffered() < MSG {
                        break;
                    }
                }
                ReadStatus::StreamEnded => break,
            }
        }
        assert_eq!(out, vec![msg(0xAA), msg(0xBB)]);
    }

    #[test]
    fn test_round_trip_arbitrary_splits() {
        // Ten tagged messages, split at awkward points.
        let mut bytes = Vec::new();
        for tag in 0..10u8 {
            bytes.extend_from_slice(&msg(tag));
        }
        let splits = [3usize, 16, 1, 40, 7, 33, 20, 25, 15];
        let mut chunks = Vec::new();
        let mut at = 0;
        for s in splits {
            chunks.push(bytes[at..at + s].to_vec());
            at += s;
        }
        chunks.push(bytes[at..].to_vec());

        let mut f = framed(chunks);
        let mut out = Vec::new();
        while out.len() < 10 {
            match f.begin_read().unwrap() {
                ReadStatus::Ready(data) => {
                    out.push(data.to_vec());
                    f.end_read();
                }
                ReadStatus::WouldBlock => {}
                ReadStatus::StreamEnded => panic!("unexpected stream end"),
            }
        }

        let expected: Vec<Vec<u8>> = (0..10u8).map(msg).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_stream_end_propagates() {
        let mut f = Framed::new(
            ScriptedStream::new(vec![]).ended(),
            fixed_size_delimiter(MSG),
        );
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::StreamEnded));
    }

    #[test]
    fn test_partial_tail_then_stream_end() {
        // Half a message buffered, then the peer goes away. The partial tail
        // never surfaces as a message.
        let mut f = Framed::new(
            ScriptedStream::new(vec![vec![0u8; MSG / 2]]).ended(),
            fixed_size_delimiter(MSG),
        );
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::WouldBlock));
        assert!(matches!(f.begin_read().unwrap(), ReadStatus::StreamEnded));
    }

    #[test]
    fn test_buffer_growth_from_tiny_capacity() {
        let mut chunk = Vec::new();
        for tag in 0..8u8 {
            chunk.extend_from_slice(&msg(tag));
        }
        let mut f = Framed::with_capacity(
            ScriptedStream::new(vec![chunk]),
            fixed_size_delimiter(MSG),
            4,
        );
        for tag in 0..8u8 {
            assert_eq!(read_one(&mut f), msg(tag));
        }
    }

    #[test]
    fn test_writes_pass_through() {
        let mut f = framed(vec![]);
        let buf = f.begin_write();
        buf[..4].copy_from_slice(b"vote");
        assert_eq!(f.end_write(4).unwrap(), WriteStatus::Committed);
        assert_eq!(f.inner.sent, vec![b"vote".to_vec()]);
    }

    #[test]
    fn test_begin_read_idempotent_before_end_read() {
        let mut f = framed(vec![msg(9)]);
        let first = match f.begin_read().unwrap() {
            ReadStatus::Ready(d) => d.to_vec(),
            other => panic!("expected Ready, got {:?}", other),
        };
        // Calling begin_read again without end_read returns the cached result.
        let second = match f.begin_read().unwrap() {
            ReadStatus::Ready(d) => d.to_vec(),
            other => panic!("expected Ready, got {:?}", other),
        };
        assert_eq!(first, second);
        assert_eq!(f.inner.reads_taken, 1);
    }
}
