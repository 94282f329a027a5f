//! Payload codec boundary.
//!
//! Workflow payloads, activity results and typed errors cross the engine as
//! `serde_json::Value`s. The engine never inspects them; it only stores and
//! replays what this module produces.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Issue reported when a value cannot be moved across the codec boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encode a typed value into its wire form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a wire value back into `T`.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    T::deserialize(value).map_err(|e| CodecError::Decode(e.to_string()))
}
