use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// One message on the socket, in either direction: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl SocketEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, WireError> {
        let data = serde_json::to_value(payload).map_err(|err| WireError::Encode(err.to_string()))?;
        Ok(Self::new(kind, data))
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        serde_json::from_value(self.data.clone()).map_err(|err| WireError::Payload(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame is not valid json: {0}")]
    Json(String),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame is missing field `{0}`")]
    MissingField(&'static str),
    #[error("frame field `type` must be a non-empty string")]
    InvalidType,
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("payload decode failed: {0}")]
    Payload(String),
}

pub fn encode_event(event: &SocketEvent, max_frame_bytes: usize) -> Result<String, WireError> {
    let encoded = serde_json::to_string(event).map_err(|err| WireError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(WireError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

/// Decodes a text frame. `data` may be `null` but has to be present.
pub fn decode_event(text: &str, max_frame_bytes: usize) -> Result<SocketEvent, WireError> {
    let raw = text.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(WireError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| WireError::Json(err.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(WireError::NotAnObject);
    };
    let kind = match map.remove("type") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
        Some(_) => return Err(WireError::InvalidType),
        None => return Err(WireError::MissingField("type")),
    };
    let data = map.remove("data").ok_or(WireError::MissingField("data"))?;
    Ok(SocketEvent { kind, data })
}
