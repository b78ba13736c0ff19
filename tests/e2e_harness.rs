#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const ENGINE_KEY: &str = "e2e-engine-key";
pub const GOOD_PROVIDER_KEY: &str = "sk-e2e-good-key";
pub const VAULT_KEY: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

/// A `vieagent serve` child process on its own port and data dir.
pub struct ServerHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    pub admin_token: String,
    data_dir: tempfile::TempDir,
    trace_log: Arc<Mutex<Vec<String>>>,
}

impl ServerHarness {
    pub async fn spawn(engine_url: &str, provider_url: &str) -> TestResult<Self> {
        let api_port = find_free_port()?;
        let data_dir = tempfile::Builder::new().prefix("vieagent-e2e").tempdir()?;
        std::fs::write(
            data_dir.path().join("config.toml"),
            format!("[providers]\nopenai = \"{}\"\n", provider_url),
        )?;

        let admin_token = issue_token(data_dir.path(), "root", true)?;

        let bin = binary_path()?;
        let log_file = std::fs::File::create(data_dir.path().join("server.log"))?;
        let log_file_err = log_file.try_clone()?;
        let child = Command::new(bin)
            .arg("serve")
            .arg("--api-host")
            .arg("127.0.0.1")
            .arg("--api-port")
            .arg(api_port.to_string())
            .env("VIEAGENT_DATA_DIR", data_dir.path())
            .env("VIEAGENT_ENGINE_URL", engine_url)
            .env("VIEAGENT_ENGINE_API_KEY", ENGINE_KEY)
            .env("VIEAGENT_ENCRYPTION_KEY", VAULT_KEY)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()?;

        let mut harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            admin_token,
            data_dir,
            trace_log: Arc::new(Mutex::new(Vec::new())),
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn issue_user_token(&self, user_id: &str) -> TestResult<String> {
        issue_token(self.data_dir.path(), user_id, false)
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                let log = std::fs::read_to_string(self.data_dir.path().join("server.log"))
                    .unwrap_or_default();
                return Err(format!("vieagent exited early with {}: {}", status, log).into());
            }

            let res = reqwest::Client::new()
                .get(format!("{}/api/health", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;
            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for vieagent API readiness".into())
    }

    /// Sends a request and returns the status with the parsed body.
    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> TestResult<(u16, Value)> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = reqwest::Client::new()
            .request(method.clone(), &url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(30));
        if let Some(payload) = body.clone() {
            req = req.json(&payload);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }));

        let mut traces = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        traces.push(format!(
            "REQUEST {} {}\nBODY {}\nSTATUS {}\nRESPONSE {}",
            method,
            path,
            body.unwrap_or(Value::Null),
            status,
            parsed
        ));
        Ok((status, parsed))
    }

    pub fn trace(&self) -> String {
        let lines = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        lines.join("\n\n---\n\n")
    }
}

impl Drop for ServerHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Runs `vieagent token create` against the data dir and pulls the raw
/// token out of its output.
fn issue_token(data_dir: &Path, user_id: &str, admin: bool) -> TestResult<String> {
    let mut cmd = Command::new(binary_path()?);
    cmd.args(["token", "create", "--user", user_id, "--name", "e2e"])
        .env("VIEAGENT_DATA_DIR", data_dir)
        .env("VIEAGENT_ENCRYPTION_KEY", VAULT_KEY);
    if admin {
        cmd.arg("--admin");
    }
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(format!(
            "token create failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    extract_token(&stdout).ok_or_else(|| format!("no token in output: {}", stdout).into())
}

pub fn extract_token(output: &str) -> Option<String> {
    let start = output.find("vat_")?;
    let token: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (token.len() > "vat_".len()).then_some(token)
}

#[derive(Clone)]
struct MockState {
    seen: Arc<Mutex<Vec<Value>>>,
}

/// Fake workflow engine plus a fake OpenAI models endpoint on one listener.
pub struct MockUpstream {
    pub port: u16,
    seen: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

async fn mock_webhook(
    State(state): State<MockState>,
    UrlPath(engine_ref): UrlPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state
        .seen
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(body.clone());
    let authorized = headers.get("authorization").and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {}", ENGINE_KEY).as_str());
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bad engine key").into_response();
    }
    if engine_ref == "fail" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "workflow crashed").into_response();
    }
    let topic = body["inputs"]["topic"].as_str().unwrap_or_default();
    Json(json!({ "article": format!("All about {}", topic) })).into_response()
}

async fn mock_models(headers: HeaderMap) -> StatusCode {
    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    if key == Some(GOOD_PROVIDER_KEY) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

impl MockUpstream {
    pub async fn start() -> TestResult<Self> {
        let port = find_free_port()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/webhook/{*engine_ref}", post(mock_webhook))
            .route("/v1/models", get(mock_models))
            .with_state(MockState { seen: seen.clone() });

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            seen,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn binary_path() -> TestResult<PathBuf> {
    if let Some(path) = option_env!("CARGO_BIN_EXE_vieagent") {
        return Ok(PathBuf::from(path));
    }
    let candidate = PathBuf::from("target")
        .join("debug")
        .join(if cfg!(windows) { "vieagent.exe" } else { "vieagent" });
    if candidate.exists() {
        return Ok(candidate);
    }
    Err("Could not locate vieagent test binary path".into())
}
