//! Wire format encoding and decoding for the commit message.
//!
//! Implements the 16-byte packed record:
//! ```text
//! ┌──────────┬───────────┬────────────┬────────────┬────────────┐
//! │ Kind     │ Source ID │ Client RTO │ Server RTO │ Timestamp  │
//! │ 2 bytes  │ 2 bytes   │ 2 bytes    │ 2 bytes    │ 8 bytes    │
//! │ int16 LE │ int16 LE  │ int16 LE   │ int16 LE   │ int64 LE   │
//! └──────────┴───────────┴────────────┴────────────┴────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The RTO counters sit at fixed
//! offsets so the reliable-delivery wrapper can bump them inside an
//! already-encoded buffer without a decode/re-encode cycle.

use crate::error::{Error, Result};

/// Wire size of a message record in bytes (fixed, exactly 16).
pub const WIRE_SIZE: usize = 16;

/// Byte offset of the client-side retransmission counter.
pub const CLIENT_RTO_OFFSET: usize = 4;

/// Byte offset of the server-side retransmission counter.
pub const SERVER_RTO_OFFSET: usize = 6;

/// Message kinds, with wire codes matching the original protocol enum.
///
/// `Lost` never travels on the wire: it is the scoreboard sentinel meaning
/// "nothing observed from this participant during the current phase".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum MsgKind {
    /// Scoreboard sentinel - no message observed.
    Lost = -1,
    /// Phase 1: coordinator asks for votes.
    Request = 0,
    /// Phase 1: participant accepts.
    VoteYes = 1,
    /// Phase 1: participant rejects.
    VoteNo = 2,
    /// Phase 2: coordinator commits the round.
    Commit = 3,
    /// Phase 2: coordinator cancels the round.
    Cancel = 4,
    /// Phase 2: participant acknowledges the decision.
    Ack = 5,
    /// Startup: participant announces itself.
    Connect = 6,
}

impl MsgKind {
    /// Wire code for this kind.
    #[inline]
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Decode a wire code. Returns `None` for codes outside the protocol.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            -1 => Some(MsgKind::Lost),
            0 => Some(MsgKind::Request),
            1 => Some(MsgKind::VoteYes),
            2 => Some(MsgKind::VoteNo),
            3 => Some(MsgKind::Commit),
            4 => Some(MsgKind::Cancel),
            5 => Some(MsgKind::Ack),
            6 => Some(MsgKind::Connect),
            _ => None,
        }
    }
}

impl std::fmt::Display for MsgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgKind::Lost => "lost",
            MsgKind::Request => "request",
            MsgKind::VoteYes => "vote-yes",
            MsgKind::VoteNo => "vote-no",
            MsgKind::Commit => "commit",
            MsgKind::Cancel => "cancel",
            MsgKind::Ack => "ack",
            MsgKind::Connect => "connect",
        };
        f.write_str(name)
    }
}

/// Decoded commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MsgKind,
    /// Participant identity (1..=N valid; 0 reserved, coordinator sends -1).
    pub source_id: i16,
    /// Client-side retransmission count, echoed back for telemetry.
    pub client_rto: i16,
    /// Server-side retransmission count, echoed back for telemetry.
    pub server_rto: i16,
    /// Send timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl Message {
    /// Create a message with zeroed telemetry fields and a fresh timestamp.
    pub fn new(kind: MsgKind, source_id: i16) -> Self {
        Self {
            kind,
            source_id,
            client_rto: 0,
            server_rto: 0,
            timestamp_us: now_micros(),
        }
    }

    /// Create a reply of the given kind, echoing the timing and retry
    /// fields of `original` unchanged.
    pub fn reply_to(kind: MsgKind, source_id: i16, original: &Message) -> Self {
        Self {
            kind,
            source_id,
            client_rto: original.client_rto,
            server_rto: original.server_rto,
            timestamp_us: original.timestamp_us,
        }
    }

    /// Encode into the first [`WIRE_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is smaller than [`WIRE_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= WIRE_SIZE);
        buf[0..2].copy_from_slice(&self.kind.code().to_le_bytes());
        buf[2..4].copy_from_slice(&self.source_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.client_rto.to_le_bytes());
        buf[6..8].copy_from_slice(&self.server_rto.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_us.to_le_bytes());
    }

    /// Encode to a fixed array.
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Decode from the first [`WIRE_SIZE`] bytes of `buf`.
    ///
    /// Trailing pad bytes beyond the record are ignored. Fails on short
    /// buffers and on kind codes outside the protocol.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < WIRE_SIZE {
            return Err(Error::Protocol(format!(
                "message too short: {} < {}",
                buf.len(),
                WIRE_SIZE
            )));
        }

        let code = i16::from_le_bytes([buf[0], buf[1]]);
        let kind = MsgKind::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("unknown message kind code {}", code)))?;

        Ok(Self {
            kind,
            source_id: i16::from_le_bytes([buf[2], buf[3]]),
            client_rto: i16::from_le_bytes([buf[4], buf[5]]),
            server_rto: i16::from_le_bytes([buf[6], buf[7]]),
            timestamp_us: i64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        })
    }
}

/// Increment the client-side RTO counter inside an encoded message buffer.
#[inline]
pub fn bump_client_rto(buf: &mut [u8]) {
    bump_i16(buf, CLIENT_RTO_OFFSET);
}

/// Increment the server-side RTO counter inside an encoded message buffer.
#[inline]
pub fn bump_server_rto(buf: &mut [u8]) {
    bump_i16(buf, SERVER_RTO_OFFSET);
}

fn bump_i16(buf: &mut [u8], offset: usize) {
    debug_assert!(buf.len() >= offset + 2);
    let value = i16::from_le_bytes([buf[offset], buf[offset + 1]]);
    buf[offset..offset + 2].copy_from_slice(&value.wrapping_add(1).to_le_bytes());
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encode_decode_roundtrip() {
        let original = Message {
            kind: MsgKind::VoteYes,
            source_id: 3,
            client_rto: 7,
            server_rto: 2,
            timestamp_us: 1_400_000_000_123_456,
        };
        let encoded = original.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_message_little_endian_byte_layout() {
        let msg = Message {
            kind: MsgKind::Commit, // code 3
            source_id: 0x0102,
            client_rto: 0x0304,
            server_rto: 0x0506,
            timestamp_us: 0x0807060504030201,
        };
        let bytes = msg.encode();

        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1], 0);

        // Source ID: 0x0102 in LE
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x01);

        // RTO counters at their fixed offsets
        assert_eq!(bytes[CLIENT_RTO_OFFSET], 0x04);
        assert_eq!(bytes[CLIENT_RTO_OFFSET + 1], 0x03);
        assert_eq!(bytes[SERVER_RTO_OFFSET], 0x06);
        assert_eq!(bytes[SERVER_RTO_OFFSET + 1], 0x05);

        // Timestamp: LE starting at byte 8
        assert_eq!(bytes[8], 0x01);
        assert_eq!(bytes[15], 0x08);
    }

    #[test]
    fn test_wire_size_is_exactly_16() {
        assert_eq!(WIRE_SIZE, 16);
        assert_eq!(Message::new(MsgKind::Ack, 1).encode().len(), 16);
    }

    #[test]
    fn test_kind_codes_match_protocol() {
        assert_eq!(MsgKind::Lost.code(), -1);
        assert_eq!(MsgKind::Request.code(), 0);
        assert_eq!(MsgKind::VoteYes.code(), 1);
        assert_eq!(MsgKind::VoteNo.code(), 2);
        assert_eq!(MsgKind::Commit.code(), 3);
        assert_eq!(MsgKind::Cancel.code(), 4);
        assert_eq!(MsgKind::Ack.code(), 5);
        assert_eq!(MsgKind::Connect.code(), 6);
    }

    #[test]
    fn test_from_code_roundtrip_and_rejects_unknown() {
        for code in -1i16..=6 {
            let kind = MsgKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(MsgKind::from_code(7).is_none());
        assert!(MsgKind::from_code(-2).is_none());
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; WIRE_SIZE - 1];
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let msg = Message::new(MsgKind::Request, -1);
        let mut padded = vec![0u8; 128];
        msg.encode_into(&mut padded);
        padded[WIRE_SIZE..].fill(0xAB);

        let decoded = Message::decode(&padded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_reply_echoes_timing_fields() {
        let request = Message {
            kind: MsgKind::Request,
            source_id: -1,
            client_rto: 4,
            server_rto: 9,
            timestamp_us: 123_456_789,
        };
        let reply = Message::reply_to(MsgKind::VoteYes, 2, &request);

        assert_eq!(reply.kind, MsgKind::VoteYes);
        assert_eq!(reply.source_id, 2);
        assert_eq!(reply.client_rto, 4);
        assert_eq!(reply.server_rto, 9);
        assert_eq!(reply.timestamp_us, 123_456_789);
    }

    #[test]
    fn test_bump_rto_counters_in_place() {
        let msg = Message::new(MsgKind::Request, -1);
        let mut buf = msg.encode().to_vec();

        bump_client_rto(&mut buf);
        bump_client_rto(&mut buf);
        bump_server_rto(&mut buf);

        let decoded = Message::decode(&buf).unwrap();
        assert_eq!(decoded.client_rto, 2);
        assert_eq!(decoded.server_rto, 1);
        assert_eq!(decoded.kind, msg.kind);
        assert_eq!(decoded.timestamp_us, msg.timestamp_us);
    }

    #[test]
    fn test_now_micros_is_monotonic_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
        assert!(a > 1_000_000_000_000_000); // after 2001 in microseconds
    }
}
