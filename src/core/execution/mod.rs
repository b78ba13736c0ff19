pub mod schema;

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::core::config::AppConfig;
use crate::core::engine::{
    EngineError, EngineRequest, EngineTarget, WorkflowEngine, redact_secrets, redact_value,
};
use crate::core::store::{ExecutionRecord, ExecutionStatus, Role, Store, TransitionFields};
use crate::core::vault::{CredentialVault, VaultError};

/// `system_config` keys that override the engine settings from `AppConfig`.
pub const ENGINE_BASE_URL_KEY: &str = "engine_base_url";
pub const ENGINE_API_KEY_KEY: &str = "engine_api_key";
pub const EXECUTION_TIMEOUT_KEY: &str = "execution_timeout_secs";

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("agent '{0}' not found")]
    NotFound(String),

    #[error("no purchase or active subscription covers this agent")]
    Forbidden,

    #[error("invalid inputs: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("missing credentials for: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    /// The run was logged and reached a terminal `failed` row.
    #[error("execution failed: {}", .0.error.as_deref().unwrap_or("unknown error"))]
    Failed(Box<ExecutionRecord>),

    #[error(transparent)]
    Vault(VaultError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<VaultError> for ExecutionError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::MissingCredentials(missing) => ExecutionError::MissingCredentials(missing),
            other => ExecutionError::Vault(other),
        }
    }
}

/// Runs an agent for a user: access check, input validation, credential
/// injection and the status row around the engine call.
pub struct ExecutionService {
    store: Store,
    vault: Arc<CredentialVault>,
    engine: Arc<dyn WorkflowEngine>,
    config: Arc<AppConfig>,
}

impl ExecutionService {
    pub fn new(
        store: Store,
        vault: Arc<CredentialVault>,
        engine: Arc<dyn WorkflowEngine>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            vault,
            engine,
            config,
        }
    }

    /// Engine location for the next call. Stored settings win over config.
    pub async fn resolve_target(&self) -> anyhow::Result<EngineTarget> {
        let base_url = match self.store.get_setting(&self.vault, ENGINE_BASE_URL_KEY).await? {
            Some(url) => url,
            None => self.config.engine_url.clone().unwrap_or_default(),
        };
        let api_key = match self.store.get_setting(&self.vault, ENGINE_API_KEY_KEY).await? {
            Some(key) => Some(key),
            None => self.config.engine_api_key.clone(),
        }
        .filter(|k| !k.trim().is_empty());
        let timeout = self
            .store
            .get_setting(&self.vault, EXECUTION_TIMEOUT_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.execution_timeout());

        Ok(EngineTarget {
            base_url,
            api_key,
            timeout,
        })
    }

    pub async fn execute(
        &self,
        user_id: &str,
        role: Role,
        agent_id: &str,
        inputs: &Value,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let agent = match self.store.find_agent(agent_id).await? {
            Some(agent) if agent.is_active => agent,
            _ => return Err(ExecutionError::NotFound(agent_id.to_string())),
        };

        if role != Role::Admin && !self.store.can_run_agent(user_id, &agent).await? {
            return Err(ExecutionError::Forbidden);
        }

        let inputs =
            schema::validate_inputs(&agent.input_schema, inputs).map_err(ExecutionError::Validation)?;
        let credentials = self
            .vault
            .resolve_for(user_id, &agent.required_providers)
            .await?;

        let execution = self
            .store
            .create_execution(user_id, &agent.id, &Value::Object(inputs.clone()))
            .await?;
        info!(
            execution_id = execution.id.as_str(),
            agent = agent.slug.as_str(),
            user_id,
            "Execution created"
        );

        let target = match self.resolve_target().await {
            Ok(target) => target,
            Err(e) => {
                self.finish(
                    &execution.id,
                    ExecutionStatus::Pending,
                    Err(format!("engine settings unavailable: {}", e)),
                    None,
                )
                .await?;
                return Err(self.failed(&execution.id).await?);
            }
        };

        if !self
            .store
            .transition_execution(
                &execution.id,
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                TransitionFields::default(),
            )
            .await?
        {
            return Err(ExecutionError::Internal(anyhow::anyhow!(
                "execution {} left pending unexpectedly",
                execution.id
            )));
        }

        let started = Instant::now();
        let request = EngineRequest {
            execution_id: &execution.id,
            agent_id: &agent.id,
            engine_ref: &agent.engine_ref,
            user_id,
            inputs: &inputs,
            credentials: &credentials,
        };
        let outcome: Result<Value, EngineError> = self.engine.run(&target, &request).await;
        let elapsed = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(mut output) => {
                redact_value(&mut output, &credentials);
                if let Err(e) = self
                    .finish(&execution.id, ExecutionStatus::Running, Ok(output), Some(elapsed))
                    .await
                {
                    error!(
                        execution_id = execution.id.as_str(),
                        "Could not record engine output: {}", e
                    );
                    self.abandon(&execution.id, &e).await;
                    return Err(ExecutionError::Internal(e));
                }
                info!(
                    execution_id = execution.id.as_str(),
                    duration_ms = elapsed,
                    "Execution completed"
                );
                self.store
                    .get_execution(&execution.id)
                    .await?
                    .ok_or_else(|| {
                        ExecutionError::Internal(anyhow::anyhow!(
                            "execution {} vanished",
                            execution.id
                        ))
                    })
            }
            Err(e) => {
                let message = redact_secrets(&e.to_string(), &credentials);
                warn!(
                    execution_id = execution.id.as_str(),
                    duration_ms = elapsed,
                    "Execution failed: {}",
                    message
                );
                if let Err(write_err) = self
                    .finish(
                        &execution.id,
                        ExecutionStatus::Running,
                        Err(message),
                        Some(elapsed),
                    )
                    .await
                {
                    error!(
                        execution_id = execution.id.as_str(),
                        "Could not record engine failure, row left running: {}", write_err
                    );
                    return Err(ExecutionError::Internal(write_err));
                }
                Err(self.failed(&execution.id).await?)
            }
        }
    }

    /// Last attempt to move a run whose result could not be written out of
    /// `running`. A second failure is only logged.
    async fn abandon(&self, id: &str, cause: &anyhow::Error) {
        let outcome = self
            .finish(
                id,
                ExecutionStatus::Running,
                Err(format!("engine result could not be recorded: {}", cause)),
                None,
            )
            .await;
        if let Err(e) = outcome {
            error!(execution_id = id, "Execution left running: {}", e);
        }
    }

    async fn finish(
        &self,
        id: &str,
        from: ExecutionStatus,
        result: Result<Value, String>,
        duration_ms: Option<i64>,
    ) -> anyhow::Result<()> {
        let (to, fields) = match result {
            Ok(output) => (
                ExecutionStatus::Completed,
                TransitionFields {
                    output: Some(output),
                    duration_ms,
                    ..TransitionFields::default()
                },
            ),
            Err(error) => (
                ExecutionStatus::Failed,
                TransitionFields {
                    error: Some(error),
                    duration_ms,
                    ..TransitionFields::default()
                },
            ),
        };
        if !self.store.transition_execution(id, from, to, fields).await? {
            warn!(execution_id = id, "Execution was no longer {}", from.as_str());
        }
        Ok(())
    }

    async fn failed(&self, id: &str) -> anyhow::Result<ExecutionError> {
        let record = self
            .store
            .get_execution(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("execution {} vanished", id))?;
        Ok(ExecutionError::Failed(Box::new(record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::Provider;
    use crate::core::store::{sample_agent, test_store};
    use crate::core::vault::test_vault;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records what it was asked to run and answers with a canned result.
    /// `Ok("echo")` answers with the request; errors quote the request.
    struct StubEngine {
        reply: Result<Value, u16>,
        calls: Mutex<Vec<(EngineTarget, Value)>>,
    }

    impl StubEngine {
        fn answering(reply: Result<Value, u16>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WorkflowEngine for StubEngine {
        async fn run(
            &self,
            target: &EngineTarget,
            request: &EngineRequest<'_>,
        ) -> Result<Value, EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push((target.clone(), serde_json::to_value(request).unwrap()));
            let sent = serde_json::to_value(request).unwrap();
            match &self.reply {
                Ok(v) if *v == "echo" => Ok(json!({ "received": sent })),
                Ok(v) => Ok(v.clone()),
                Err(code) => Err(EngineError::Status(
                    *code,
                    format!("upstream broke on {}", sent),
                )),
            }
        }
    }

    struct Fixture {
        store: Store,
        vault: Arc<CredentialVault>,
        engine: Arc<StubEngine>,
        service: ExecutionService,
    }

    async fn fixture(reply: Result<Value, u16>) -> Fixture {
        let store = test_store();
        let vault = Arc::new(test_vault(store.get_db()).await);
        let engine = StubEngine::answering(reply);
        let config = AppConfig {
            engine_url: Some("http://engine.local".to_string()),
            ..AppConfig::default()
        };
        let service = ExecutionService::new(
            store.clone(),
            vault.clone(),
            engine.clone(),
            Arc::new(config),
        );
        Fixture {
            store,
            vault,
            engine,
            service,
        }
    }

    #[tokio::test]
    async fn successful_run_completes_and_injects_credentials() {
        let f = fixture(Ok(json!({ "text": "article" }))).await;
        let agent = f.store.create_agent(&sample_agent("writer", 0)).await.unwrap();
        f.vault
            .store("u1", Provider::OpenAi, "sk-user-secret-1")
            .await
            .unwrap();

        let record = f
            .service
            .execute("u1", Role::User, "writer", &json!({ "topic": "rust" }))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.agent_id, agent.id);
        assert_eq!(record.output_snapshot, Some(json!({ "text": "article" })));
        assert!(record.duration_ms.is_some());
        assert!(record.started_at.is_some() && record.finished_at.is_some());

        let snapshot = record.input_snapshot.to_string();
        assert!(!snapshot.contains("sk-user-secret-1"));

        let calls = f.engine.calls.lock().unwrap();
        let (target, body) = &calls[0];
        assert_eq!(target.base_url, "http://engine.local");
        assert_eq!(body["credentials"]["OPENAI_API_KEY"], "sk-user-secret-1");
        assert_eq!(body["inputs"]["topic"], "rust");
    }

    #[tokio::test]
    async fn engine_failure_is_logged_as_failed() {
        let f = fixture(Err(502)).await;
        f.store.create_agent(&sample_agent("flaky", 0)).await.unwrap();
        f.vault.store("u1", Provider::OpenAi, "sk-user-secret-1").await.unwrap();

        let err = f
            .service
            .execute("u1", Role::User, "flaky", &json!({ "topic": "x" }))
            .await
            .unwrap_err();
        let record = match err {
            ExecutionError::Failed(record) => record,
            other => panic!("expected Failed, got {other:?}"),
        };
        assert_eq!(record.status, ExecutionStatus::Failed);
        let error = record.error.as_deref().unwrap();
        assert!(error.contains("502"));
        assert!(error.contains("OPENAI_API_KEY"));
        assert!(!error.contains("sk-user-secret-1"));
        assert!(record.output_snapshot.is_none());

        let stored = f.store.list_executions(Some("u1"), 10).await.unwrap();
        assert!(!stored[0].error.as_deref().unwrap().contains("sk-user-secret-1"));
    }

    #[tokio::test]
    async fn echoed_credentials_never_reach_the_output_snapshot() {
        let f = fixture(Ok(json!("echo"))).await;
        f.store.create_agent(&sample_agent("mirror", 0)).await.unwrap();
        f.vault.store("u1", Provider::OpenAi, "sk-user-secret-1").await.unwrap();

        let record = f
            .service
            .execute("u1", Role::User, "mirror", &json!({ "topic": "x" }))
            .await
            .unwrap();
        let output = record.output_snapshot.unwrap();
        assert_eq!(output["received"]["inputs"]["topic"], "x");
        assert_eq!(output["received"]["credentials"]["OPENAI_API_KEY"], "********");

        let stored = f.store.get_execution(&record.id).await.unwrap().unwrap();
        assert!(!stored.output_snapshot.unwrap().to_string().contains("sk-user-secret-1"));
    }

    #[tokio::test]
    async fn unrecordable_output_still_ends_the_run() {
        let f = fixture(Ok(json!({ "text": "done" }))).await;
        f.store.create_agent(&sample_agent("stuck", 0)).await.unwrap();
        f.vault.store("u1", Provider::OpenAi, "sk-user-secret-1").await.unwrap();
        {
            let db = f.store.get_db();
            let db = db.lock().await;
            db.execute_batch(
                "CREATE TRIGGER refuse_completion BEFORE UPDATE ON workflow_executions
                 WHEN NEW.status = 'completed'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        }

        let err = f
            .service
            .execute("u1", Role::User, "stuck", &json!({ "topic": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Internal(_)));

        let rows = f.store.list_executions(Some("u1"), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Failed);
        assert!(rows[0].error.as_deref().unwrap().contains("could not be recorded"));
    }

    #[tokio::test]
    async fn paid_agent_is_forbidden_without_grant_but_admin_bypasses() {
        let f = fixture(Ok(json!({}))).await;
        f.store.create_agent(&sample_agent("paid", 999)).await.unwrap();
        f.vault.store("u1", Provider::OpenAi, "sk-user-secret-1").await.unwrap();
        let inputs = json!({ "topic": "x" });

        assert!(matches!(
            f.service.execute("u1", Role::User, "paid", &inputs).await,
            Err(ExecutionError::Forbidden)
        ));
        assert!(f.service.execute("u1", Role::Admin, "paid", &inputs).await.is_ok());
        assert!(f.store.list_executions(Some("u1"), 10).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn rejected_requests_leave_no_row() {
        let f = fixture(Ok(json!({}))).await;
        let mut hidden = sample_agent("hidden", 0);
        hidden.is_active = false;
        f.store.create_agent(&hidden).await.unwrap();
        f.store.create_agent(&sample_agent("open", 0)).await.unwrap();

        assert!(matches!(
            f.service.execute("u1", Role::User, "hidden", &json!({})).await,
            Err(ExecutionError::NotFound(_))
        ));
        assert!(matches!(
            f.service.execute("u1", Role::User, "open", &json!({})).await,
            Err(ExecutionError::Validation(_))
        ));
        match f
            .service
            .execute("u1", Role::User, "open", &json!({ "topic": "x" }))
            .await
        {
            Err(ExecutionError::MissingCredentials(missing)) => assert_eq!(missing, vec!["openai"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.store.list_executions(None, 10).await.unwrap().is_empty());
        assert!(f.engine.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_settings_override_config() {
        let f = fixture(Ok(json!({}))).await;
        f.store
            .set_setting(&f.vault, ENGINE_BASE_URL_KEY, "http://override:5678", false)
            .await
            .unwrap();
        f.store
            .set_setting(&f.vault, ENGINE_API_KEY_KEY, "engine-secret", true)
            .await
            .unwrap();
        f.store
            .set_setting(&f.vault, EXECUTION_TIMEOUT_KEY, "7", false)
            .await
            .unwrap();

        let target = f.service.resolve_target().await.unwrap();
        assert_eq!(target.base_url, "http://override:5678");
        assert_eq!(target.api_key.as_deref(), Some("engine-secret"));
        assert_eq!(target.timeout, Duration::from_secs(7));
    }
}
