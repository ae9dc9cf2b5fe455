//! Custom metadata attachment
//!
//! Caller metadata travels as one JSON string under a reserved user-metadata
//! key. Absent metadata is written as `{}`, never omitted.

use crate::error::{Result, TransferError};
use crate::storage::UserMetadata;
use serde_json::{Map, Value};

/// Caller-supplied metadata mapping
pub type CustomMetadata = Map<String, Value>;

/// Build the user-metadata map carrying `metadata` under `key`
pub fn encode_attachment(metadata: Option<&CustomMetadata>, key: &str) -> Result<UserMetadata> {
    let encoded = match metadata {
        Some(map) => serde_json::to_string(map)?,
        None => "{}".to_string(),
    };
    Ok(UserMetadata::from([(key.to_string(), encoded)]))
}

/// Read the custom metadata stored under `key`.
///
/// A missing attachment decodes as the empty mapping.
pub fn decode_attachment(user_metadata: &UserMetadata, key: &str) -> Result<CustomMetadata> {
    let Some(raw) = user_metadata.get(key) else {
        return Ok(CustomMetadata::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(TransferError::DecodeError(format!(
            "metadata attachment '{key}' is not an object: {other}"
        ))),
    }
}
