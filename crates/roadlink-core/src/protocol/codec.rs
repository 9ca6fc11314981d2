//! Text frame ↔ envelope conversion.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::messages::{InboundMsg, OutboundMsg};

/// Why an inbound text frame could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string \"type\" field")]
    MissingType,

    #[error("malformed '{tag}' envelope: {source}")]
    Invalid {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound envelope plus the identity it claims to speak for.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Raw `device_id` field, if the sender included one.
    pub device_id: Option<String>,
    pub msg: InboundMsg,
}

/// Parses one text frame.
///
/// Unknown tags decode successfully to [`InboundMsg::Unknown`]; only frames
/// that are not JSON objects with a `type` string, or known tags with
/// ill-typed fields, are errors.
pub fn decode_inbound(text: &str) -> Result<InboundEnvelope, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();
    let device_id = object.get("device_id").and_then(Value::as_str).map(str::to_string);

    let msg = InboundMsg::deserialize(value).map_err(|source| DecodeError::Invalid { tag, source })?;
    Ok(InboundEnvelope { device_id, msg })
}

/// Serialises an outbound envelope to a text frame.
pub fn encode_outbound(msg: &OutboundMsg) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Seconds since the Unix epoch, as carried in envelope timestamps.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
