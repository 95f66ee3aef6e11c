//! Token expiry evaluation with a safety margin
//!
//! A token counts as expired once `exp <= now + margin`. The margin makes a
//! refresh happen a little before the real deadline, so a token is not
//! handed out only to expire while the request using it is in flight.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::jwt::{Claims, decode_payload};

/// Current Unix time in whole seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Read the `exp` claim as Unix seconds.
///
/// Accepts integers, floats (truncated) and integer strings, since some
/// IdPs emit `exp` as a string.
pub fn expiry_of(claims: &Claims) -> Result<i64> {
    let exp = claims
        .get("exp")
        .ok_or_else(|| Error::MissingClaim("token has no exp claim".into()))?;

    let parsed = match exp {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| Error::MissingClaim(format!("exp claim is not numeric: {exp}")))
}

/// Whether `token` is expired, or within `margin_secs` of expiring, at `now`.
///
/// `None` and `Some(0)` both mean "expired only once the deadline passed".
pub fn is_expired_at(token: &str, margin_secs: Option<u64>, now: i64) -> Result<bool> {
    let exp = expiry_of(&decode_payload(token)?)?;
    let margin = i64::try_from(margin_secs.unwrap_or(0)).unwrap_or(i64::MAX);
    let threshold = now.saturating_add(margin);
    trace!(exp, threshold, "evaluated token expiry");
    Ok(exp <= threshold)
}

/// Whether `token` is expired, or within `margin_secs` of expiring, right now.
pub fn is_expired(token: &str, margin_secs: Option<u64>) -> Result<bool> {
    is_expired_at(token, margin_secs, now_unix())
}
