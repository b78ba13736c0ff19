pub(crate) mod auth;
mod error;
mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::core::execution::ExecutionService;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::providers::ProbeRegistry;
use crate::core::store::Store;
use crate::core::vault::CredentialVault;

pub use router::build_api_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Store,
    pub(crate) vault: Arc<CredentialVault>,
    pub(crate) probes: Arc<ProbeRegistry>,
    pub(crate) executions: Arc<ExecutionService>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

pub struct ApiServerConfig {
    pub store: Store,
    pub vault: Arc<CredentialVault>,
    pub probes: Arc<ProbeRegistry>,
    pub executions: Arc<ExecutionService>,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                store: config.store,
                vault: config.vault,
                probes: config.probes,
                executions: config.executions,
                log_tx: config.log_tx,
                api_port: config.api_port,
            },
            api_host: config.api_host,
            shutdown_tx: None,
            handle: None,
        }
    }
}

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- Lifecycle ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &'static str {
        "API server"
    }

    /// Binds before returning so a taken port fails startup instead of a
    /// background task.
    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("cannot bind API server to {}: {}", addr, e))?;
        let app = build_api_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        info!("API server running at http://{}", addr);
        self.handle = Some(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("API server crashed: {}", e);
            }
        }));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("API server task ended abnormally: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    use crate::core::config::AppConfig;
    use crate::core::engine::HttpWorkflowEngine;

    let store = crate::core::store::test_store();
    let vault = Arc::new(crate::core::vault::test_vault(store.get_db()).await);
    let config = Arc::new(AppConfig::default());
    let executions = Arc::new(ExecutionService::new(
        store.clone(),
        vault.clone(),
        Arc::new(HttpWorkflowEngine::default()),
        config.clone(),
    ));
    let (log_tx, _) = broadcast::channel(16);
    AppState {
        store,
        vault,
        probes: Arc::new(ProbeRegistry::new()),
        executions,
        log_tx,
        api_port: config.api_port,
    }
}
