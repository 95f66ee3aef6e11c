//! Unverified JWT payload decoding
//!
//! Reads the claims out of a compact JWT (`header.payload.signature`)
//! without checking the signature. The result is only fit for inspecting
//! claims such as `exp`; it says nothing about whether the token is genuine.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Decoded JWT claims.
pub type Claims = Map<String, Value>;

/// Pad a base64url segment with `=` up to a multiple of 4 characters.
///
/// JWT segments are emitted without padding, but the canonical decoder
/// requires it. A segment with `len % 4 == 1` gets three `=` and still fails
/// to decode: no byte sequence encodes to that length.
pub fn pad_segment(segment: &str) -> String {
    let missing = (4 - segment.len() % 4) % 4;
    let mut padded = String::with_capacity(segment.len() + missing);
    padded.push_str(segment);
    padded.push_str(&"=".repeat(missing));
    padded
}

/// Decode the payload segment of `token` into its claims.
pub fn decode_payload(token: &str) -> Result<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 dot-separated segments, got {}",
            segments.len()
        )));
    }

    let bytes = URL_SAFE
        .decode(pad_segment(segments[1]))
        .map_err(|e| Error::MalformedToken(format!("payload is not base64url: {e}")))?;

    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("payload is not JSON: {e}")))?;

    match value {
        Value::Object(claims) => Ok(claims),
        other => Err(Error::MalformedToken(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}
