//! Per-user auth state and refresh outcomes
//!
//! `AuthState` is owned by the host. A refresh reads it and, on success,
//! hands back a rewritten copy; the host's stored copy is never mutated in
//! place, so a refresh that fails halfway cannot leave new tokens behind
//! without a matching profile.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Token and profile bundle persisted by the host for a logged-in user.
///
/// `access_token` is required: deserializing a state without one fails,
/// since no refresh can be attempted without it. Fields the refresh logic
/// does not know about (`id_token`, `scope`, ...) are kept in `extra` and
/// written back unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Profile returned by the IdP userinfo endpoint, replaced wholesale on refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_user: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthState {
    /// State holding only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            oauth_user: None,
            extra: Map::new(),
        }
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("oauth_user", &self.oauth_user)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of one refresh attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshResult {
    /// Stored state is still valid and nothing changed
    Unchanged,
    /// Tokens cannot be renewed; the user must log in again
    Invalid,
    /// New tokens and/or a fresh profile; replaces the stored state
    Updated(AuthState),
}

/// Response handed back to the host.
///
/// Serializes to `false`, `true`, or `{"auth_state": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshUserResponse {
    Reauthenticate,
    UpToDate,
    Update(AuthState),
}

impl From<RefreshResult> for RefreshUserResponse {
    fn from(result: RefreshResult) -> Self {
        match result {
            RefreshResult::Unchanged => RefreshUserResponse::UpToDate,
            RefreshResult::Invalid => RefreshUserResponse::Reauthenticate,
            RefreshResult::Updated(state) => RefreshUserResponse::Update(state),
        }
    }
}

impl Serialize for RefreshUserResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RefreshUserResponse::Reauthenticate => serializer.serialize_bool(false),
            RefreshUserResponse::UpToDate => serializer.serialize_bool(true),
            RefreshUserResponse::Update(state) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("auth_state", state)?;
                map.end()
            }
        }
    }
}
