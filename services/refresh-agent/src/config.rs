//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client secret is loaded from OAUTH_CLIENT_SECRET or
//! `oauth.client_secret_file`, never from the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clb_auth::{IdpSettings, RefreshSettings};
use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: IdpSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    pub agent: AgentConfig,
}

/// Refresh agent settings
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// JSON file mapping user names to auth states
    pub auth_state_path: PathBuf,
    /// Serve `/health` and `/metrics` here when set
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OAUTH_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("OAUTH_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }
        if let Ok(token_url) = std::env::var("OAUTH2_TOKEN_URL") {
            config.oauth.token_url = token_url;
        }
        if let Ok(userdata_url) = std::env::var("OAUTH2_USERDATA_URL") {
            config.oauth.userdata_url = userdata_url;
        }

        if let Ok(secret) = std::env::var("OAUTH_CLIENT_SECRET") {
            config.oauth.client_secret = Secret::from_trimmed(&secret);
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            config.oauth.client_secret = Secret::from_trimmed(&secret);
        }

        config
            .oauth
            .validate()
            .map_err(|e| common::Error::Config(format!("[oauth] {e}")))?;

        if !config.refresh.enable_auth_state {
            return Err(common::Error::Config(
                "refresh.enable_auth_state must be true: refreshing users needs stored auth state"
                    .into(),
            ));
        }

        if config.refresh.auth_refresh_age == 0 {
            return Err(common::Error::Config(
                "auth_refresh_age must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("clb-refresh-agent.toml")
    }
}
