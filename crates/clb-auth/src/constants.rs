//! Defaults for the Collaboratory authenticator
//!
//! These mirror the values the Collaboratory deployment runs with: refresh
//! every 15 minutes and before each spawn, with auth-state persistence on.

/// Seconds before the real expiry at which a token already counts as expired
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 5;

/// Seconds between periodic host-driven refreshes of an active user
pub const DEFAULT_AUTH_REFRESH_AGE_SECS: u64 = 900;

/// Per-request timeout for IdP calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// User-Agent sent to the IdP
pub const DEFAULT_USER_AGENT: &str = "JupyterHub";

/// HTTP method for the userinfo endpoint
pub const DEFAULT_USERDATA_METHOD: &str = "GET";
