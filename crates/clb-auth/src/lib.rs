//! Collaboratory OAuth2 token refresh
//!
//! Keeps a logged-in user's stored tokens usable. On each host-driven
//! refresh the access token's `exp` claim is inspected (without verifying
//! the signature); if it is expired or about to be, the refresh token is
//! exchanged at the IdP token endpoint. The user profile is then re-fetched
//! from the userinfo endpoint.
//!
//! Refresh flow:
//! 1. `jwt::decode_payload()` reads the token claims
//! 2. `expiry::is_expired()` applies the configured `refresh_margin`
//! 3. `IdentityProvider::refresh_token()` renews an expired access token
//! 4. `IdentityProvider::fetch_userinfo()` re-fetches `oauth_user`
//! 5. `ClbAuthenticator::refresh()` returns the outcome to the host

pub mod constants;
pub mod error;
pub mod expiry;
pub mod idp;
pub mod jwt;
pub mod refresh;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use constants::*;
pub use error::{Error, Result};
pub use expiry::{is_expired, is_expired_at};
pub use idp::{HttpIdentityProvider, IdentityProvider, TokenResponse, build_client};
pub use jwt::{Claims, decode_payload};
pub use refresh::ClbAuthenticator;
pub use settings::{IdpSettings, RefreshSettings, UserdataTokenMethod};
