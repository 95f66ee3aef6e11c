//! Error types for token inspection and IdP calls

use authenticator::AuthenticatorError;

/// Errors from token inspection, IdP calls, and setup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("missing claim: {0}")]
    MissingClaim(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("userinfo request failed: {0}")]
    Userinfo(String),
}

impl Error {
    /// Whether this error came from talking to the IdP (network, status,
    /// or response body) rather than from local inspection or setup.
    pub fn is_idp_failure(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::TokenRefresh(_)
                | Error::InvalidCredentials(_)
                | Error::Userinfo(_)
        )
    }
}

impl From<Error> for AuthenticatorError {
    fn from(err: Error) -> Self {
        match err {
            Error::Configuration(msg) => AuthenticatorError::Configuration(msg),
            other => AuthenticatorError::Internal(other.to_string()),
        }
    }
}

/// Result alias for authenticator operations.
pub type Result<T> = std::result::Result<T, Error>;
