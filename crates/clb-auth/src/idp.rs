//! Identity provider calls: refresh-token exchange and userinfo lookup
//!
//! `IdentityProvider` is the seam the refresh orchestrator depends on.
//! `HttpIdentityProvider` implements it over one shared `reqwest::Client`,
//! so connections are pooled across users and refresh cycles. Timeouts come
//! from the client configuration; a timeout surfaces as `Error::Http` like
//! any other transport failure.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::{IdpSettings, UserdataTokenMethod};

/// Token endpoint response for a refresh-token grant.
///
/// `refresh_token` is only present when the IdP rotates refresh tokens.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the new access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// The two IdP round trips a refresh needs.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdentityProvider>`).
pub trait IdentityProvider: Send + Sync {
    /// Exchange a refresh token for a new access token.
    fn refresh_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    /// Fetch the profile of the user owning `access_token`.
    fn fetch_userinfo<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
}

/// Build the shared HTTP client for IdP calls from the settings.
///
/// Applies the request timeout and the TLS verification toggle.
pub fn build_client(settings: &IdpSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.timeout())
        .danger_accept_invalid_certs(!settings.tls_verify)
        .build()
        .map_err(|e| Error::Configuration(format!("building IdP HTTP client: {e}")))
}

/// `IdentityProvider` speaking OAuth2 over HTTP.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    settings: IdpSettings,
    userdata_method: Method,
}

impl HttpIdentityProvider {
    /// Validate `settings` and build a dedicated client from them.
    pub fn new(settings: IdpSettings) -> Result<Self> {
        let client = build_client(&settings)?;
        Self::with_client(client, settings)
    }

    /// Use an existing client, e.g. one shared with other IdP integrations.
    /// The caller is responsible for its timeout and TLS configuration.
    pub fn with_client(client: reqwest::Client, settings: IdpSettings) -> Result<Self> {
        settings.validate()?;
        let userdata_method = settings.userdata_method()?;
        Ok(Self {
            client,
            settings,
            userdata_method,
        })
    }

    pub fn settings(&self) -> &IdpSettings {
        &self.settings
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let client_secret = self
            .settings
            .client_secret
            .as_ref()
            .map(|s| s.expose().as_str());

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let mut request = self
            .client
            .post(&self.settings.token_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.settings.user_agent);

        if self.settings.basic_auth {
            request = request.basic_auth(&self.settings.client_id, client_secret);
        } else {
            form.push(("client_id", self.settings.client_id.as_str()));
            if let Some(secret) = client_secret {
                form.push(("client_secret", secret));
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;

            // 400/401/403 mean the refresh token or client credentials were refused
            if matches!(status.as_u16(), 400 | 401 | 403) {
                return Err(Error::InvalidCredentials(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }

            return Err(Error::TokenRefresh(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let tokens = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenRefresh(format!("invalid refresh response: {e}")))?;
        debug!(
            rotated_refresh_token = tokens.refresh_token.is_some(),
            expires_in = tokens.expires_in,
            "token endpoint issued new access token"
        );
        Ok(tokens)
    }

    async fn request_userinfo(&self, access_token: &str) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = self
            .settings
            .userdata_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut request = self
            .client
            .request(self.userdata_method.clone(), &self.settings.userdata_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.settings.user_agent);

        match self.settings.userdata_token_method {
            UserdataTokenMethod::Header => request = request.bearer_auth(access_token),
            UserdataTokenMethod::Url => query.push(("access_token", access_token)),
        }

        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("userinfo request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(Error::Userinfo(format!(
                "userinfo endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Userinfo(format!("invalid userinfo response: {e}")))
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn refresh_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(self.exchange_refresh_token(refresh_token))
    }

    fn fetch_userinfo<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(self.request_userinfo(access_token))
    }
}

async fn error_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockIdp, Reply};
    use common::Secret;
    use serde_json::json;
    use std::time::Duration;

    fn settings_for(idp: &MockIdp) -> IdpSettings {
        let mut settings = IdpSettings::new(idp.url("/token"), idp.url("/userinfo"));
        settings.client_id = "collab-hub".into();
        settings.client_secret = Some(Secret::new("s3cret".into()));
        settings
    }

    #[tokio::test]
    async fn refresh_sends_actual_refresh_token_with_basic_auth() {
        let idp = MockIdp::start(vec![(
            "/token",
            Reply::json(200, json!({"access_token": "at_new", "refresh_token": "rt_new"})),
        )])
        .await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let tokens = provider.refresh_token("rt_current").await.unwrap();
        assert_eq!(tokens.access_token, "at_new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt_new"));

        let requests = idp.requests_to("/token");
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        let form = request.form();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "rt_current");
        assert!(!form.contains_key("client_secret"));
        // base64("collab-hub:s3cret")
        assert_eq!(
            request.header("authorization"),
            Some("Basic Y29sbGFiLWh1YjpzM2NyZXQ=")
        );
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("user-agent"), Some("JupyterHub"));
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[tokio::test]
    async fn refresh_puts_credentials_in_body_without_basic_auth() {
        let idp = MockIdp::start(vec![(
            "/token",
            Reply::json(200, json!({"access_token": "at_new"})),
        )])
        .await;
        let mut settings = settings_for(&idp);
        settings.basic_auth = false;
        let provider = HttpIdentityProvider::new(settings).unwrap();

        let tokens = provider.refresh_token("rt_current").await.unwrap();
        assert!(tokens.refresh_token.is_none());

        let request = &idp.requests_to("/token")[0];
        assert!(request.header("authorization").is_none());
        let form = request.form();
        assert_eq!(form["client_id"], "collab-hub");
        assert_eq!(form["client_secret"], "s3cret");
        assert_eq!(form["refresh_token"], "rt_current");
    }

    #[tokio::test]
    async fn public_client_omits_client_secret_from_body() {
        let idp = MockIdp::start(vec![(
            "/token",
            Reply::json(200, json!({"access_token": "at_new"})),
        )])
        .await;
        let mut settings = settings_for(&idp);
        settings.basic_auth = false;
        settings.client_secret = None;
        let provider = HttpIdentityProvider::new(settings).unwrap();

        provider.refresh_token("rt_current").await.unwrap();

        let form = idp.requests_to("/token")[0].form();
        assert_eq!(form["client_id"], "collab-hub");
        assert!(!form.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn refresh_rejection_is_invalid_credentials() {
        let idp = MockIdp::start(vec![(
            "/token",
            Reply::json(401, json!({"error": "invalid_grant"})),
        )])
        .await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let err = provider.refresh_token("rt_revoked").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got {err:?}");
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn refresh_server_error_is_token_refresh() {
        let idp = MockIdp::start(vec![("/token", Reply::raw(503, "maintenance"))]).await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let err = provider.refresh_token("rt").await.unwrap_err();
        assert!(matches!(err, Error::TokenRefresh(_)), "got {err:?}");
        assert!(err.is_idp_failure());
    }

    #[tokio::test]
    async fn refresh_response_without_access_token_is_rejected() {
        let idp = MockIdp::start(vec![(
            "/token",
            Reply::json(200, json!({"token_type": "Bearer"})),
        )])
        .await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let err = provider.refresh_token("rt").await.unwrap_err();
        assert!(err.to_string().contains("invalid refresh response"), "got: {err}");
    }

    #[tokio::test]
    async fn userinfo_uses_bearer_header_and_params() {
        let idp = MockIdp::start(vec![(
            "/userinfo",
            Reply::json(200, json!({"sub": "42", "preferred_username": "jdoe"})),
        )])
        .await;
        let mut settings = settings_for(&idp);
        settings
            .userdata_params
            .insert("schema".into(), "openid".into());
        let provider = HttpIdentityProvider::new(settings).unwrap();

        let profile = provider.fetch_userinfo("at_current").await.unwrap();
        assert_eq!(profile["preferred_username"], "jdoe");

        let request = &idp.requests_to("/userinfo")[0];
        assert_eq!(request.method, "GET");
        assert_eq!(request.header("authorization"), Some("Bearer at_current"));
        let query = request.query_pairs();
        assert_eq!(query["schema"], "openid");
        assert!(!query.contains_key("access_token"));
    }

    #[tokio::test]
    async fn userinfo_url_mode_sends_token_as_query_param() {
        let idp = MockIdp::start(vec![(
            "/userinfo",
            Reply::json(200, json!({"sub": "42"})),
        )])
        .await;
        let mut settings = settings_for(&idp);
        settings.userdata_token_method = UserdataTokenMethod::Url;
        settings.userdata_method = "POST".into();
        let provider = HttpIdentityProvider::new(settings).unwrap();

        provider.fetch_userinfo("at_current").await.unwrap();

        let request = &idp.requests_to("/userinfo")[0];
        assert_eq!(request.method, "POST");
        assert!(request.header("authorization").is_none());
        assert_eq!(request.query_pairs()["access_token"], "at_current");
    }

    #[tokio::test]
    async fn userinfo_error_status_is_userinfo_error() {
        let idp = MockIdp::start(vec![("/userinfo", Reply::raw(500, "boom"))]).await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let err = provider.fetch_userinfo("at").await.unwrap_err();
        assert!(matches!(err, Error::Userinfo(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn userinfo_unparseable_body_is_userinfo_error() {
        let idp = MockIdp::start(vec![("/userinfo", Reply::raw(200, "<html>login</html>"))]).await;
        let provider = HttpIdentityProvider::new(settings_for(&idp)).unwrap();

        let err = provider.fetch_userinfo("at").await.unwrap_err();
        assert!(err.to_string().contains("invalid userinfo response"), "got: {err}");
    }

    #[tokio::test]
    async fn unreachable_idp_is_http_error() {
        // Port 1 on localhost refuses connections
        let settings = IdpSettings::new("http://127.0.0.1:1/token", "http://127.0.0.1:1/userinfo");
        let provider = HttpIdentityProvider::new(settings).unwrap();

        let err = provider.refresh_token("rt").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_idp_times_out_as_http_error() {
        let idp = MockIdp::start(vec![(
            "/userinfo",
            Reply::json(200, json!({"sub": "42"})).delayed(Duration::from_secs(3)),
        )])
        .await;
        let mut settings = settings_for(&idp);
        settings.timeout_secs = 1;
        let provider = HttpIdentityProvider::new(settings).unwrap();

        let err = provider.fetch_userinfo("at").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }

    #[test]
    fn invalid_settings_rejected_at_construction() {
        let settings = IdpSettings::new("not-a-url", "https://a/userinfo");
        assert!(matches!(
            HttpIdentityProvider::new(settings),
            Err(Error::Configuration(_))
        ));
    }
}
