//! Shared test helpers: unsigned JWT builders and an in-process fake IdP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::expiry::now_unix;

/// Build an unsigned compact JWT carrying `payload`.
pub(crate) fn make_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    let signature = URL_SAFE_NO_PAD.encode(b"not-a-real-signature");
    format!("{header}.{body}.{signature}")
}

/// Token whose `exp` lies `secs` from now (negative for already expired).
pub(crate) fn token_expiring_in(secs: i64) -> String {
    make_token(&json!({"sub": "user-1", "exp": now_unix() + secs}))
}

/// Canned response for one path of the fake IdP.
#[derive(Clone)]
pub(crate) struct Reply {
    status: u16,
    body: String,
    delay: Duration,
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self::raw(status, &body.to_string())
    }

    pub(crate) fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as seen by the fake IdP.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Recorded {
    /// Parse the form body. Test values are URL-safe, so no decoding is done.
    pub(crate) fn form(&self) -> HashMap<String, String> {
        parse_pairs(&self.body)
    }

    pub(crate) fn query_pairs(&self) -> HashMap<String, String> {
        parse_pairs(&self.query)
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

fn parse_pairs(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Fake IdP listening on an ephemeral localhost port.
///
/// Answers each path with its canned `Reply` (404 otherwise) and records
/// every request it receives.
pub(crate) struct MockIdp {
    base_url: String,
    recorded: Arc<Mutex<Vec<Recorded>>>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockIdp {
    pub(crate) async fn start(replies: Vec<(&str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let replies: Arc<HashMap<String, Reply>> = Arc::new(
            replies
                .into_iter()
                .map(|(path, reply)| (path.to_string(), reply))
                .collect(),
        );
        let recorded = Arc::new(Mutex::new(Vec::new()));

        let app = {
            let recorded = recorded.clone();
            axum::Router::new().fallback(move |request: Request<Body>| {
                let recorded = recorded.clone();
                let replies = replies.clone();
                async move {
                    let method = request.method().to_string();
                    let path = request.uri().path().to_string();
                    let query = request.uri().query().unwrap_or("").to_string();
                    let headers = request
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (name.to_string(), value.to_str().unwrap_or("").to_string())
                        })
                        .collect();
                    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                        .await
                        .unwrap();
                    recorded.lock().unwrap().push(Recorded {
                        method,
                        path: path.clone(),
                        query,
                        headers,
                        body: String::from_utf8_lossy(&bytes).to_string(),
                    });

                    let reply = replies
                        .get(&path)
                        .cloned()
                        .unwrap_or_else(|| Reply::raw(404, r#"{"error":"not_found"}"#));
                    tokio::time::sleep(reply.delay).await;
                    (
                        StatusCode::from_u16(reply.status).unwrap(),
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        reply.body,
                    )
                }
            })
        };

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            recorded,
            _server: server,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }
}
