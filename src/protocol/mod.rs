//! Protocol module - the fixed-layout commit message and its wire format.
//!
//! Every exchange in a round is one [`Message`]: a 16-byte packed record
//! whose layout is identical on the coordinator and every participant.
//! Messages may be padded up to a configured floor on the wire; the pad
//! bytes are ignored on decode.

mod message;

pub use message::{
    bump_client_rto, bump_server_rto, now_micros, MsgKind, Message, CLIENT_RTO_OFFSET,
    SERVER_RTO_OFFSET, WIRE_SIZE,
};
