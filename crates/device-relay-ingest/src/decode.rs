//! Defensive base64 decoding of stream entries.

use std::borrow::Cow;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::Value;
use thiserror::Error;

/// Reason a stream entry could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not a string")]
    NotAString,
    #[error("Payload is empty")]
    Empty,
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Restore `=` padding stripped upstream so the length is a multiple of 4.
#[must_use]
pub fn repair_padding(payload: &str) -> Cow<'_, str> {
    match payload.len() % 4 {
        0 => Cow::Borrowed(payload),
        rem => {
            let mut repaired = String::with_capacity(payload.len() + 4 - rem);
            repaired.push_str(payload);
            repaired.extend(std::iter::repeat_n('=', 4 - rem));
            Cow::Owned(repaired)
        }
    }
}

/// Decode a base64 string after padding repair.
///
/// # Errors
/// Returns error if the payload is empty or not valid base64.
pub fn decode_str(payload: &str) -> Result<Vec<u8>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(BASE64.decode(repair_padding(payload).as_bytes())?)
}

/// Decode the value of a stream entry.
///
/// # Errors
/// Returns error if the value is not a non-empty base64 string.
pub fn decode_payload(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let Value::String(payload) = value else {
        return Err(DecodeError::NotAString);
    };
    decode_str(payload)
}
