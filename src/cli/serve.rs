use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::AppConfig;
use crate::core::engine::HttpWorkflowEngine;
use crate::core::execution::ExecutionService;
use crate::core::lifecycle::LifecycleManager;
use crate::core::providers::ProbeRegistry;
use crate::core::store::Store;
use crate::core::terminal::GuideSection;
use crate::core::vault::{CredentialCipher, CredentialVault, resolve_master_key};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

pub async fn run_server(config: AppConfig) -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    crate::logging::init(&config.log, log_tx.clone());

    info!(
        "Starting vieagent {} (data dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.data_dir.display()
    );

    let store = Store::open(&config.db_path())?;
    let key = resolve_master_key(config.encryption_key.as_deref(), &config.data_dir)?;
    let vault = Arc::new(CredentialVault::new(
        store.get_db(),
        CredentialCipher::new(&key),
    ));
    vault.initialize().await?;

    let probes = Arc::new(ProbeRegistry::from_endpoints(
        &config.providers,
        config.probe_timeout(),
    )?);
    let config = Arc::new(config);
    let executions = Arc::new(ExecutionService::new(
        store.clone(),
        vault.clone(),
        Arc::new(HttpWorkflowEngine::default()),
        config.clone(),
    ));

    let api = ApiServer::new(ApiServerConfig {
        store,
        vault,
        probes,
        executions,
        log_tx,
        api_host: config.api_host.clone(),
        api_port: config.api_port,
    });

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(api)));
    lifecycle.start().await?;

    GuideSection::new("vieagent")
        .status(
            "API",
            &format!(
                "{}",
                style(format!("http://{}:{}", config.api_host, config.api_port))
                    .underlined()
                    .cyan()
            ),
        )
        .status(
            "Engine",
            config.engine_url.as_deref().unwrap_or("set engine_base_url"),
        )
        .blank()
        .status(
            "Press Ctrl+C to stop.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    lifecycle.shutdown().await
}
