//! Host contract for refreshing user authentication state
//!
//! Defines the `Refreshable` capability that decouples the host (session
//! spawner, auth-state persistence) from the refresh strategy. A host keeps
//! the per-user `AuthState`, hands it to `refresh_user`, and acts on the
//! returned `RefreshUserResponse`:
//! - `false` forces the user to log in again
//! - `true` keeps the current session as-is
//! - `{"auth_state": {...}}` replaces the stored auth state

pub mod state;

pub use state::{AuthState, RefreshResult, RefreshUserResponse};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors a refresh strategy may surface to the host.
///
/// IdP failures never appear here: they are folded into
/// `RefreshResult::Invalid` before reaching the host.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticatorError {
    #[error("authenticator misconfigured: {0}")]
    Configuration(String),

    #[error("internal authenticator error: {0}")]
    Internal(String),
}

/// Result alias for authenticator operations.
pub type Result<T> = std::result::Result<T, AuthenticatorError>;

/// Capability to bring a user's stored auth state up to date.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Refreshable>`).
pub trait Refreshable: Send + Sync {
    /// Identifier for logging (e.g. "clb")
    fn id(&self) -> &str;

    /// Inspect `auth_state` for `user` and refresh it against the identity
    /// provider when needed.
    fn refresh<'a>(
        &'a self,
        user: &'a str,
        auth_state: &'a AuthState,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResult>> + Send + 'a>>;

    /// Whether the host should refresh right before spawning a session.
    fn refresh_pre_spawn(&self) -> bool;

    /// How often the host should re-run `refresh` for an active user.
    fn auth_refresh_age(&self) -> Duration;
}

/// Host entry point: refresh `user` and translate the outcome into the
/// response shape the host understands.
///
/// A missing auth state means persistence is off or was never populated,
/// which is a host misconfiguration rather than a reason to log the user out.
pub async fn refresh_user(
    refreshable: &dyn Refreshable,
    user: &str,
    auth_state: Option<&AuthState>,
) -> Result<RefreshUserResponse> {
    let auth_state = auth_state.ok_or_else(|| {
        AuthenticatorError::Configuration(format!(
            "no stored auth state for {user}; refreshing requires enable_auth_state"
        ))
    })?;
    let result = refreshable.refresh(user, auth_state).await?;
    Ok(result.into())
}
