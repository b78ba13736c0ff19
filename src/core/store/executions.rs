use anyhow::{Result, bail};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use super::Store;
use super::types::{ExecutionRecord, ExecutionStatus, TransitionFields};

const EXECUTION_COLUMNS: &str = "id, user_id, agent_id, status, input_snapshot, output_snapshot, \
     error, duration_ms, created_at, started_at, finished_at";

/// Listing never returns more than this many rows.
pub const MAX_EXECUTION_PAGE: u32 = 200;

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let conversion = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
    };
    let status: String = row.get(3)?;
    let input: String = row.get(4)?;
    let output: Option<String> = row.get(5)?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| conversion(3, format!("unknown status '{}'", status).into()))?,
        input_snapshot: serde_json::from_str(&input).map_err(|e| conversion(4, Box::new(e)))?,
        output_snapshot: output
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| conversion(5, Box::new(e)))?,
        error: row.get(6)?,
        duration_ms: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
    })
}

impl Store {
    pub async fn create_execution(
        &self,
        user_id: &str,
        agent_id: &str,
        inputs: &Value,
    ) -> Result<ExecutionRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let snapshot = serde_json::to_string(inputs)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO workflow_executions (id, user_id, agent_id, status, input_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, agent_id, ExecutionStatus::Pending.as_str(), snapshot],
        )?;
        let record = db.query_row(
            &format!(
                "SELECT {} FROM workflow_executions WHERE id = ?1",
                EXECUTION_COLUMNS
            ),
            params![id],
            execution_from_row,
        )?;
        Ok(record)
    }

    /// Compare-and-set on `status`. Returns false when the row was not in
    /// `from` any more (or does not exist); errors on a backwards move.
    pub async fn transition_execution(
        &self,
        id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
        fields: TransitionFields,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            bail!(
                "execution cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            );
        }
        let output = fields.output.as_ref().map(serde_json::to_string).transpose()?;

        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE workflow_executions SET
                status = ?1,
                output_snapshot = COALESCE(?2, output_snapshot),
                error = COALESCE(?3, error),
                duration_ms = COALESCE(?4, duration_ms),
                started_at = CASE WHEN ?1 = 'running' THEN CURRENT_TIMESTAMP ELSE started_at END,
                finished_at = CASE WHEN ?1 IN ('completed', 'failed')
                                   THEN CURRENT_TIMESTAMP ELSE finished_at END
             WHERE id = ?5 AND status = ?6",
            params![
                to.as_str(),
                output,
                fields.error,
                fields.duration_ms,
                id,
                from.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!(
                    "SELECT {} FROM workflow_executions WHERE id = ?1",
                    EXECUTION_COLUMNS
                ),
                params![id],
                execution_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Newest first. `user_id = None` lists everyone's runs (admin view).
    pub async fn list_executions(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>> {
        let limit = limit.clamp(1, MAX_EXECUTION_PAGE);
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM workflow_executions
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            EXECUTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, limit], execution_from_row)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?);
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{AgentRemoval, sample_agent, test_store};
    use serde_json::json;

    #[tokio::test]
    async fn lifecycle_stamps_timestamps() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("runner", 0)).await.unwrap();
        let exec = store
            .create_execution("u1", &agent.id, &json!({ "topic": "rust" }))
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.started_at.is_none());

        assert!(
            store
                .transition_execution(
                    &exec.id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    TransitionFields::default()
                )
                .await
                .unwrap()
        );
        assert!(
            store
                .transition_execution(
                    &exec.id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Completed,
                    TransitionFields {
                        output: Some(json!({ "text": "done" })),
                        duration_ms: Some(42),
                        ..TransitionFields::default()
                    }
                )
                .await
                .unwrap()
        );

        let done = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.output_snapshot, Some(json!({ "text": "done" })));
        assert_eq!(done.input_snapshot, json!({ "topic": "rust" }));
        assert_eq!(done.duration_ms, Some(42));
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn stale_transition_is_a_no_op() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("cas", 0)).await.unwrap();
        let exec = store.create_execution("u1", &agent.id, &json!({})).await.unwrap();

        let failed = TransitionFields {
            error: Some("boom".to_string()),
            ..TransitionFields::default()
        };
        assert!(
            store
                .transition_execution(&exec.id, ExecutionStatus::Pending, ExecutionStatus::Failed, failed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition_execution(
                    &exec.id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    TransitionFields::default()
                )
                .await
                .unwrap()
        );
        let row = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(row.status, ExecutionStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn backwards_transition_is_an_error() {
        let store = test_store();
        let res = store
            .transition_execution(
                "whatever",
                ExecutionStatus::Completed,
                ExecutionStatus::Running,
                TransitionFields::default(),
            )
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn listing_is_scoped_and_limited() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("lister", 0)).await.unwrap();
        for _ in 0..3 {
            store.create_execution("u1", &agent.id, &json!({})).await.unwrap();
        }
        let last = store.create_execution("u2", &agent.id, &json!({})).await.unwrap();

        assert_eq!(store.list_executions(Some("u1"), 50).await.unwrap().len(), 3);
        assert_eq!(store.list_executions(Some("u1"), 2).await.unwrap().len(), 2);
        let all = store.list_executions(None, 50).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, last.id);
    }

    #[tokio::test]
    async fn agent_with_history_is_deactivated_on_delete() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("kept", 0)).await.unwrap();
        store.create_execution("u1", &agent.id, &json!({})).await.unwrap();

        assert_eq!(
            store.delete_agent(&agent.id).await.unwrap(),
            AgentRemoval::Deactivated
        );
        let agent = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert!(!agent.is_active);
    }
}
