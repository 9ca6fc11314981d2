//! Wire protocol: JSON envelopes and the text-frame codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_inbound, encode_outbound, unix_timestamp, DecodeError, InboundEnvelope};
pub use messages::{InboundMsg, OutboundMsg, PositionPayload, ResponseKind};
