use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::Store;
use super::types::{AgentRecord, PurchaseRecord, SubscriptionRecord};

#[derive(Debug, thiserror::Error)]
#[error("invalid timestamp '{0}'")]
pub struct InvalidTimestamp(pub String);

/// Subscription states that still grant access.
const LIVE_SUBSCRIPTION_STATES: &str = "('active', 'trialing')";

impl Store {
    /// Idempotent: granting the same agent twice keeps the first purchase.
    pub async fn grant_purchase(
        &self,
        user_id: &str,
        agent_id: &str,
        amount_cents: i64,
    ) -> Result<PurchaseRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO user_purchases (id, user_id, agent_id, amount_cents)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, agent_id) DO NOTHING",
            params![id, user_id, agent_id, amount_cents],
        )?;
        let record = db.query_row(
            "SELECT id, user_id, agent_id, amount_cents, created_at
             FROM user_purchases WHERE user_id = ?1 AND agent_id = ?2",
            params![user_id, agent_id],
            |row| {
                Ok(PurchaseRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    agent_id: row.get(2)?,
                    amount_cents: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(record)
    }

    pub async fn has_purchase(&self, user_id: &str, agent_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM user_purchases WHERE user_id = ?1 AND agent_id = ?2",
            params![user_id, agent_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// One subscription row per user. `current_period_end` accepts anything
    /// SQLite's `datetime()` understands and is stored normalized.
    pub async fn upsert_subscription(
        &self,
        user_id: &str,
        plan: &str,
        status: &str,
        current_period_end: Option<&str>,
    ) -> Result<SubscriptionRecord> {
        let db = self.db.lock().await;
        let period_end: Option<String> = match current_period_end {
            Some(raw) => {
                let normalized: Option<String> =
                    db.query_row("SELECT datetime(?1)", params![raw], |row| row.get(0))?;
                Some(normalized.ok_or_else(|| InvalidTimestamp(raw.to_string()))?)
            }
            None => None,
        };

        let id = uuid::Uuid::new_v4().to_string();
        db.execute(
            "INSERT INTO user_subscriptions (id, user_id, plan, status, current_period_end)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                current_period_end = excluded.current_period_end",
            params![id, user_id, plan, status, period_end],
        )?;
        let record = db.query_row(
            "SELECT id, user_id, plan, status, current_period_end, created_at
             FROM user_subscriptions WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(SubscriptionRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    plan: row.get(2)?,
                    status: row.get(3)?,
                    current_period_end: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )?;
        Ok(record)
    }

    pub async fn has_active_subscription(&self, user_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let found = db
            .query_row(
                &format!(
                    "SELECT 1 FROM user_subscriptions
                     WHERE user_id = ?1 AND status IN {}
                       AND (current_period_end IS NULL OR current_period_end > datetime('now'))",
                    LIVE_SUBSCRIPTION_STATES
                ),
                params![user_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Free listings, purchased listings, or any live subscription.
    pub async fn can_run_agent(&self, user_id: &str, agent: &AgentRecord) -> Result<bool> {
        if agent.is_free() {
            return Ok(true);
        }
        if self.has_purchase(user_id, &agent.id).await? {
            return Ok(true);
        }
        self.has_active_subscription(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::core::store::{sample_agent, test_store};

    #[tokio::test]
    async fn free_agents_need_no_grant() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("free", 0)).await.unwrap();
        assert!(store.can_run_agent("anyone", &agent).await.unwrap());
    }

    #[tokio::test]
    async fn paid_agent_requires_purchase() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("paid", 2000)).await.unwrap();
        assert!(!store.can_run_agent("u1", &agent).await.unwrap());

        let first = store.grant_purchase("u1", &agent.id, 2000).await.unwrap();
        let again = store.grant_purchase("u1", &agent.id, 0).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.amount_cents, 2000);

        assert!(store.can_run_agent("u1", &agent).await.unwrap());
        assert!(!store.can_run_agent("u2", &agent).await.unwrap());
    }

    #[tokio::test]
    async fn purchase_of_unknown_agent_fails_foreign_key() {
        let store = test_store();
        assert!(store.grant_purchase("u1", "no-such-agent", 100).await.is_err());
    }

    #[tokio::test]
    async fn live_subscription_unlocks_paid_agents() {
        let store = test_store();
        let agent = store.create_agent(&sample_agent("pro", 5000)).await.unwrap();

        store
            .upsert_subscription("u1", "pro", "active", Some("2999-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert!(store.can_run_agent("u1", &agent).await.unwrap());

        let sub = store
            .upsert_subscription("u1", "pro", "canceled", None)
            .await
            .unwrap();
        assert_eq!(sub.status, "canceled");
        assert!(!store.can_run_agent("u1", &agent).await.unwrap());
    }

    #[tokio::test]
    async fn expired_subscription_does_not_count() {
        let store = test_store();
        let sub = store
            .upsert_subscription("u1", "pro", "active", Some("2001-02-03 04:05:06"))
            .await
            .unwrap();
        assert_eq!(sub.current_period_end.as_deref(), Some("2001-02-03 04:05:06"));
        assert!(!store.has_active_subscription("u1").await.unwrap());

        store.upsert_subscription("u1", "pro", "trialing", None).await.unwrap();
        assert!(store.has_active_subscription("u1").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_period_end_is_rejected() {
        let store = test_store();
        let err = store
            .upsert_subscription("u1", "pro", "active", Some("next tuesday"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<super::InvalidTimestamp>().is_some());
    }
}
