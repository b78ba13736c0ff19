use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use super::Store;
use super::types::{ApiTokenRecord, Role};

pub const TOKEN_PREFIX: &str = "vat_";

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_raw_token() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

fn token_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiTokenRecord> {
    let role: String = row.get(2)?;
    Ok(ApiTokenRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::User),
        name: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Store {
    /// Only the SHA-256 of the token is stored; the raw value is returned once.
    pub async fn create_api_token(
        &self,
        user_id: &str,
        role: Role,
        name: &str,
    ) -> Result<(String, ApiTokenRecord)> {
        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let id = uuid::Uuid::new_v4().to_string();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO api_tokens (id, user_id, role, name, token_hash) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, role.as_str(), name, token_hash],
        )?;
        let record = db.query_row(
            "SELECT id, user_id, role, name, created_at FROM api_tokens WHERE id = ?1",
            params![id],
            token_from_row,
        )?;
        Ok((raw_token, record))
    }

    pub async fn resolve_api_token(&self, raw_token: &str) -> Result<Option<ApiTokenRecord>> {
        if !raw_token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }
        let token_hash = hash_token(raw_token);
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, user_id, role, name, created_at FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                token_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, role, name, created_at FROM api_tokens ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], token_from_row)?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    pub async fn delete_api_token(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute("DELETE FROM api_tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;

    #[tokio::test]
    async fn created_token_resolves_to_its_owner() {
        let store = test_store();
        let (raw, record) = store
            .create_api_token("alice", Role::Admin, "ops laptop")
            .await
            .unwrap();
        assert!(raw.starts_with(TOKEN_PREFIX));
        assert_eq!(raw.len(), TOKEN_PREFIX.len() + 32);

        let resolved = store.resolve_api_token(&raw).await.unwrap().unwrap();
        assert_eq!(resolved, record);
        assert_eq!(resolved.role, Role::Admin);
        assert_eq!(resolved.user_id, "alice");
    }

    #[tokio::test]
    async fn raw_token_is_not_stored() {
        let store = test_store();
        let (raw, _) = store.create_api_token("bob", Role::User, "cli").await.unwrap();
        let db = store.get_db();
        let db = db.lock().await;
        let stored: String = db
            .query_row("SELECT token_hash FROM api_tokens", [], |row| row.get(0))
            .unwrap();
        assert_ne!(stored, raw);
        assert_eq!(stored, hash_token(&raw));
    }

    #[tokio::test]
    async fn revoked_and_unknown_tokens_do_not_resolve() {
        let store = test_store();
        let (raw, record) = store.create_api_token("bob", Role::User, "cli").await.unwrap();
        assert_eq!(store.list_api_tokens().await.unwrap().len(), 1);

        assert!(store.delete_api_token(&record.id).await.unwrap());
        assert!(!store.delete_api_token(&record.id).await.unwrap());
        assert!(store.resolve_api_token(&raw).await.unwrap().is_none());
        assert!(store.resolve_api_token("not-a-token").await.unwrap().is_none());
    }
}
