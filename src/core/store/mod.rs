mod access;
mod agents;
mod executions;
mod settings;
mod tokens;
pub mod types;

pub use access::InvalidTimestamp;
pub use executions::MAX_EXECUTION_PAGE;
pub use settings::{MASKED_VALUE, SettingView};
pub use tokens::TOKEN_PREFIX;
pub use types::*;

#[cfg(test)]
pub(crate) use agents::sample_agent;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

/// Relational rows behind the marketplace: listings, access grants,
/// execution log, system settings and API tokens. Credentials live in the
/// vault, which shares this connection.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
            NativePlatform::restrict_dir_permissions(parent)
                .map_err(|e| anyhow!("cannot restrict {}: {}", parent.display(), e))?;
        }
        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path)
            .map_err(|e| anyhow!("cannot restrict {}: {}", path.display(), e))?;
        Self::init_schema(&db)?;
        info!("Opened store at {}", path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.pragma_update(None, "foreign_keys", true)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price_cents INTEGER NOT NULL DEFAULT 0,
                currency TEXT NOT NULL DEFAULT 'USD',
                engine_ref TEXT NOT NULL,
                input_schema TEXT NOT NULL DEFAULT '[]',
                required_providers TEXT NOT NULL DEFAULT '[]',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                status TEXT NOT NULL,
                input_snapshot TEXT NOT NULL,
                output_snapshot TEXT,
                error TEXT,
                duration_ms INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                started_at DATETIME,
                finished_at DATETIME
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_workflow_executions_user_created
             ON workflow_executions(user_id, created_at)",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS user_purchases (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                amount_cents INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, agent_id)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS user_subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL,
                status TEXT NOT NULL,
                current_period_end DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS system_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                iv TEXT,
                is_secret INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS api_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                name TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        Ok(())
    }
}

/// True when `err` wraps a SQLite UNIQUE/FOREIGN KEY/CHECK violation.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .and_then(|e| e.sqlite_error_code())
        .is_some_and(|code| code == rusqlite::ErrorCode::ConstraintViolation)
}

#[cfg(test)]
pub(crate) fn test_store() -> Store {
    Store::open_in_memory().expect("in-memory store")
}
