//! Authenticator settings
//!
//! `IdpSettings` describes how to reach the identity provider;
//! `RefreshSettings` controls when a refresh happens. Both deserialize from
//! the host's config with the Collaboratory defaults filled in. The client
//! secret is never read from config text: loaders fill `client_secret` from
//! the environment or `client_secret_file`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use common::Secret;
use reqwest::Method;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_AUTH_REFRESH_AGE_SECS, DEFAULT_REFRESH_MARGIN_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_USER_AGENT, DEFAULT_USERDATA_METHOD,
};
use crate::error::{Error, Result};

/// Where the access token goes on the userinfo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserdataTokenMethod {
    /// `Authorization: Bearer <token>`
    #[default]
    Header,
    /// `?access_token=<token>`
    Url,
}

/// Identity provider endpoints and client credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpSettings {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub userdata_url: String,
    /// Extra query parameters for the userinfo request
    #[serde(default)]
    pub userdata_params: BTreeMap<String, String>,
    #[serde(default = "default_userdata_method")]
    pub userdata_method: String,
    #[serde(default)]
    pub userdata_token_method: UserdataTokenMethod,
    #[serde(default)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// Send client credentials as HTTP Basic auth instead of in the form body
    #[serde(default = "default_true")]
    pub basic_auth: bool,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// When and whether refreshes run.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "default_true")]
    pub enable_auth_state: bool,
    /// Seconds before expiry at which a token already counts as expired.
    /// `None` or `0` means the exact expiry time.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: Option<u64>,
    #[serde(default = "default_auth_refresh_age")]
    pub auth_refresh_age: u64,
    #[serde(default = "default_true")]
    pub refresh_pre_spawn: bool,
}

fn default_true() -> bool {
    true
}

fn default_userdata_method() -> String {
    DEFAULT_USERDATA_METHOD.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_refresh_margin() -> Option<u64> {
    Some(DEFAULT_REFRESH_MARGIN_SECS)
}

fn default_auth_refresh_age() -> u64 {
    DEFAULT_AUTH_REFRESH_AGE_SECS
}

impl IdpSettings {
    /// Settings for the given endpoints with every other field defaulted.
    pub fn new(token_url: impl Into<String>, userdata_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            userdata_url: userdata_url.into(),
            userdata_params: BTreeMap::new(),
            userdata_method: default_userdata_method(),
            userdata_token_method: UserdataTokenMethod::default(),
            client_id: String::new(),
            client_secret: None,
            client_secret_file: None,
            basic_auth: true,
            tls_verify: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }

    /// Parsed `userdata_method`.
    pub fn userdata_method(&self) -> Result<Method> {
        let upper = self.userdata_method.trim().to_ascii_uppercase();
        Method::from_bytes(upper.as_bytes()).map_err(|_| {
            Error::Configuration(format!(
                "userdata_method is not an HTTP method: {}",
                self.userdata_method
            ))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject settings that could never produce a working IdP call.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("token_url", &self.token_url),
            ("userdata_url", &self.userdata_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Configuration(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.timeout_secs == 0 {
            return Err(Error::Configuration(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        self.userdata_method()?;
        Ok(())
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enable_auth_state: true,
            refresh_margin: default_refresh_margin(),
            auth_refresh_age: DEFAULT_AUTH_REFRESH_AGE_SECS,
            refresh_pre_spawn: true,
        }
    }
}

impl RefreshSettings {
    pub fn auth_refresh_age(&self) -> Duration {
        Duration::from_secs(self.auth_refresh_age)
    }
}
