//! Client for the external workflow engine that actually runs agents.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Upstream error bodies are cut to this many characters before they are
/// stored in the execution log.
pub const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow engine is not configured")]
    NotConfigured,

    #[error("workflow engine returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("workflow engine did not answer within {0}s")]
    Timeout(u64),

    #[error("workflow engine unreachable: {0}")]
    Transport(String),
}

/// Where and how to reach the engine for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTarget {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// What is posted to the engine. `credentials` maps engine config keys
/// (`OPENAI_API_KEY`, ...) to decrypted secrets and must never be logged.
#[derive(Serialize)]
pub struct EngineRequest<'a> {
    pub execution_id: &'a str,
    pub agent_id: &'a str,
    #[serde(skip)]
    pub engine_ref: &'a str,
    pub user_id: &'a str,
    pub inputs: &'a Map<String, Value>,
    pub credentials: &'a BTreeMap<String, String>,
}

impl std::fmt::Debug for EngineRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRequest")
            .field("execution_id", &self.execution_id)
            .field("agent_id", &self.agent_id)
            .field("engine_ref", &self.engine_ref)
            .field("user_id", &self.user_id)
            .field("inputs", &self.inputs)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn run(&self, target: &EngineTarget, request: &EngineRequest<'_>)
    -> Result<Value, EngineError>;
}

/// Stands in for a credential wherever engine text is kept or returned.
pub const REDACTED: &str = "********";

/// Forms a secret can take inside engine text: raw, and JSON-escaped when the
/// engine echoes the request body.
fn secret_forms(secret: &str) -> Vec<String> {
    let mut forms = vec![secret.to_string()];
    if let Ok(quoted) = serde_json::to_string(secret) {
        let escaped = quoted[1..quoted.len() - 1].to_string();
        if escaped != secret {
            forms.push(escaped);
        }
    }
    forms
}

/// Replace every credential value occurring in `text`.
pub fn redact_secrets(text: &str, credentials: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for secret in credentials.values().filter(|s| !s.is_empty()) {
        for form in secret_forms(secret) {
            out = out.replace(&form, REDACTED);
        }
    }
    out
}

/// Same as [`redact_secrets`] for every string (keys included) in a JSON value.
pub fn redact_value(value: &mut Value, credentials: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => *s = redact_secrets(s, credentials),
        Value::Array(items) => {
            for item in items {
                redact_value(item, credentials);
            }
        }
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut item) in entries {
                redact_value(&mut item, credentials);
                map.insert(redact_secrets(&key, credentials), item);
            }
        }
        _ => {}
    }
}

pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("{}…", cut)
}

pub struct HttpWorkflowEngine {
    client: Client,
}

impl Default for HttpWorkflowEngine {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl HttpWorkflowEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn webhook_url(base_url: &str, engine_ref: &str) -> String {
        format!(
            "{}/webhook/{}",
            base_url.trim_end_matches('/'),
            engine_ref.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn run(
        &self,
        target: &EngineTarget,
        request: &EngineRequest<'_>,
    ) -> Result<Value, EngineError> {
        if target.base_url.trim().is_empty() {
            return Err(EngineError::NotConfigured);
        }
        let url = Self::webhook_url(&target.base_url, request.engine_ref);
        debug!(execution_id = request.execution_id, "POST {}", url);

        let mut builder = self
            .client
            .post(&url)
            .timeout(target.timeout)
            .json(request);
        if let Some(key) = &target.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(target.timeout.as_secs())
            } else {
                EngineError::Transport(e.without_url().to_string())
            }
        })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(target.timeout.as_secs())
            } else {
                EngineError::Transport(e.without_url().to_string())
            }
        })?;

        if !status.is_success() {
            let body = redact_secrets(&body, request.credentials);
            return Err(EngineError::Status(status.as_u16(), truncate_body(&body)));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({ "text": body })))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    pub const ENGINE_KEY: &str = "engine-bearer-1";

    /// Fake engine. `/webhook/echo/..` echoes the request body back,
    /// `/webhook/plain` answers text, `/webhook/fail` 500s, `/webhook/reject`
    /// answers 400 quoting the request and
    /// `/webhook/slow` sleeps past short timeouts. Every body received is
    /// recorded.
    pub async fn spawn_mock_engine() -> (String, Arc<Mutex<Vec<Value>>>) {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let app = Router::new().route(
            "/webhook/{*path}",
            post(
                move |Path(path): Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                    let recorder = recorder.clone();
                    async move {
                        recorder.lock().unwrap().push(body.clone());
                        let authorized = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            == Some(format!("Bearer {}", ENGINE_KEY).as_str());
                        if !authorized {
                            return (StatusCode::UNAUTHORIZED, "bad engine key").into_response();
                        }
                        match path.as_str() {
                            "plain" => "plain text result".into_response(),
                            "fail" => (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(2000))
                                .into_response(),
                            "reject" => (StatusCode::BAD_REQUEST, format!("bad request: {}", body))
                                .into_response(),
                            "slow" => {
                                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                                Json(json!({ "late": true })).into_response()
                            }
                            _ => Json(json!({ "ok": true, "echo": body })).into_response(),
                        }
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock engine");
        let addr = listener.local_addr().expect("mock engine addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}", addr), seen)
    }
}
