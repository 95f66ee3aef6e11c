//! Refresh orchestration
//!
//! Decides whether a user's stored tokens need renewing, performs the
//! refresh-token exchange when they do, and always re-fetches the profile so
//! `oauth_user` stays current. Every IdP failure degrades to
//! `RefreshResult::Invalid` (the user logs in again); only a disabled
//! auth-state store is reported as an error.
//!
//! Outcomes:
//! - access token valid → one userinfo call → `Updated`, or `Unchanged` when
//!   the fetched profile equals the stored `oauth_user`. The host treats
//!   both the same (session kept); `Unchanged` spares it a write.
//! - access token expired, refresh token usable → token call + userinfo call
//!   → `Updated` with the new tokens
//! - access token expired, no usable refresh token → `Invalid`, no calls
//! - any IdP call fails → `Invalid`; the caller's state is left untouched

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use authenticator::{AuthState, AuthenticatorError, RefreshResult, Refreshable};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::expiry::is_expired;
use crate::idp::{HttpIdentityProvider, IdentityProvider};
use crate::settings::{IdpSettings, RefreshSettings};

/// Refresh strategy of the Collaboratory authenticator.
///
/// Holds no per-user state: concurrent refreshes for different users share
/// only the IdP client. The host owns each `AuthState` and serializes
/// refreshes of the same user.
pub struct ClbAuthenticator {
    settings: RefreshSettings,
    idp: Arc<dyn IdentityProvider>,
}

impl ClbAuthenticator {
    pub fn new(settings: RefreshSettings, idp: Arc<dyn IdentityProvider>) -> Self {
        Self { settings, idp }
    }

    /// Authenticator talking to the IdP described by `idp` over HTTP.
    pub fn from_settings(settings: RefreshSettings, idp: IdpSettings) -> Result<Self> {
        let idp = HttpIdentityProvider::new(idp)?;
        Ok(Self::new(settings, Arc::new(idp)))
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Bring `auth_state` for `user` up to date.
    ///
    /// Returns `Err` only for `Error::Configuration` (auth-state persistence
    /// disabled). Unreadable tokens and IdP failures are logged and reported
    /// as `RefreshResult::Invalid`.
    pub async fn refresh(&self, user: &str, auth_state: &AuthState) -> Result<RefreshResult> {
        if !self.settings.enable_auth_state {
            return Err(Error::Configuration(
                "refreshing users requires enable_auth_state to be set".into(),
            ));
        }

        let margin = self.settings.refresh_margin;
        let mut state = auth_state.clone();

        let refresh_usable = match state.refresh_token.as_deref() {
            None => false,
            Some(token) => match is_expired(token, margin) {
                Ok(expired) => !expired,
                Err(e) => {
                    debug!(user = %user, error = %e, "refresh token unreadable, treating as unusable");
                    false
                }
            },
        };

        let access_expired = match is_expired(&state.access_token, margin) {
            Ok(expired) => expired,
            Err(e) => {
                warn!(user = %user, error = %e, "cannot read access token expiry, user must log in again");
                return Ok(RefreshResult::Invalid);
            }
        };

        let mut rotated = false;
        if access_expired {
            let refresh_token = match state.refresh_token.as_deref() {
                Some(token) if refresh_usable => token,
                _ => {
                    info!(user = %user, "access token expired and no usable refresh token");
                    return Ok(RefreshResult::Invalid);
                }
            };

            let tokens = match self.idp.refresh_token(refresh_token).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(user = %user, error = %e, "failed to refresh access token");
                    return Ok(RefreshResult::Invalid);
                }
            };

            if let Some(new_refresh) = tokens.refresh_token {
                state.refresh_token = Some(new_refresh);
            }
            state.access_token = tokens.access_token;
            rotated = true;
            debug!(user = %user, "access token refreshed");
        }

        let userdata = match self.idp.fetch_userinfo(&state.access_token).await {
            Ok(userdata) => userdata,
            Err(e) => {
                // Fail closed: tokens from a refresh above are dropped with the profile
                warn!(user = %user, error = %e, refreshed = rotated, "failed to refresh auth info");
                return Ok(RefreshResult::Invalid);
            }
        };

        if !rotated && state.oauth_user.as_ref() == Some(&userdata) {
            debug!(user = %user, "auth state up to date");
            return Ok(RefreshResult::Unchanged);
        }

        state.oauth_user = Some(userdata);
        info!(user = %user, refreshed = rotated, "auth state updated");
        Ok(RefreshResult::Updated(state))
    }
}

impl Refreshable for ClbAuthenticator {
    fn id(&self) -> &str {
        "clb"
    }

    fn refresh<'a>(
        &'a self,
        user: &'a str,
        auth_state: &'a AuthState,
    ) -> Pin<Box<dyn Future<Output = authenticator::Result<RefreshResult>> + Send + 'a>> {
        Box::pin(async move {
            ClbAuthenticator::refresh(self, user, auth_state)
                .await
                .map_err(AuthenticatorError::from)
        })
    }

    fn refresh_pre_spawn(&self) -> bool {
        self.settings.refresh_pre_spawn
    }

    fn auth_refresh_age(&self) -> Duration {
        self.settings.auth_refresh_age()
    }
}
