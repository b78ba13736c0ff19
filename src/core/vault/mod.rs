mod cipher;

pub use cipher::{CredentialCipher, Sealed, generate_hex_key, resolve_master_key};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::providers::Provider;
use crate::core::store::SettingRow;

pub const MIN_KEY_LEN: usize = 8;
pub const MAX_KEY_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid API key: {0}")]
    InvalidKey(String),

    #[error("missing credentials for: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("stored secret '{0}' could not be decrypted")]
    Undecryptable(String),

    #[error("encryption failed: {0}")]
    Crypto(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// What the API shows about a stored key. Never carries the secret itself.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CredentialSummary {
    pub id: String,
    pub provider: String,
    pub key_hint: String,
    pub last_tested_at: Option<String>,
    pub last_test_ok: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-user encrypted API keys plus secret system settings.
pub struct CredentialVault {
    db: Arc<Mutex<Connection>>,
    cipher: CredentialCipher,
}

fn credential_aad(user_id: &str, provider: Provider) -> String {
    format!("{}:{}", user_id, provider.as_str())
}

fn setting_aad(key: &str) -> String {
    format!("system_config:{}", key)
}

/// Trim and sanity-check a pasted key before it goes anywhere near the cipher.
pub fn normalize_api_key(raw: &str) -> VaultResult<String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(VaultError::InvalidKey("key is empty".to_string()));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(VaultError::InvalidKey(
            "key must not contain whitespace".to_string(),
        ));
    }
    let len = key.chars().count();
    if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&len) {
        return Err(VaultError::InvalidKey(format!(
            "key length must be between {} and {} characters",
            MIN_KEY_LEN, MAX_KEY_LEN
        )));
    }
    Ok(key.to_string())
}

pub fn key_hint(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("••••{}", tail)
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialSummary> {
    Ok(CredentialSummary {
        id: row.get(0)?,
        provider: row.get(1)?,
        key_hint: row.get(2)?,
        last_tested_at: row.get(3)?,
        last_test_ok: row.get::<_, Option<i64>>(4)?.map(|v| v != 0),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const SUMMARY_COLUMNS: &str =
    "id, provider, key_hint, last_tested_at, last_test_ok, created_at, updated_at";

impl CredentialVault {
    pub fn new(db: Arc<Mutex<Connection>>, cipher: CredentialCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                encrypted_value TEXT NOT NULL,
                iv TEXT NOT NULL,
                key_hint TEXT NOT NULL,
                last_tested_at DATETIME,
                last_test_ok INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, provider)
            )",
            [],
        )?;
        Ok(())
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    /// Encrypt and upsert. Replacing a key clears its previous test result.
    pub async fn store(
        &self,
        user_id: &str,
        provider: Provider,
        api_key: &str,
    ) -> VaultResult<CredentialSummary> {
        let key = normalize_api_key(api_key)?;
        let sealed = self
            .cipher
            .encrypt(&key, &credential_aad(user_id, provider))
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let id = uuid::Uuid::new_v4().to_string();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO credentials (id, user_id, provider, encrypted_value, iv, key_hint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, provider) DO UPDATE SET
                encrypted_value = excluded.encrypted_value,
                iv = excluded.iv,
                key_hint = excluded.key_hint,
                last_tested_at = NULL,
                last_test_ok = NULL,
                updated_at = CURRENT_TIMESTAMP",
            params![
                id,
                user_id,
                provider.as_str(),
                sealed.ciphertext,
                sealed.iv,
                key_hint(&key)
            ],
        )?;
        let summary = db.query_row(
            &format!(
                "SELECT {} FROM credentials WHERE user_id = ?1 AND provider = ?2",
                SUMMARY_COLUMNS
            ),
            params![user_id, provider.as_str()],
            summary_from_row,
        )?;
        info!(user_id, provider = provider.as_str(), "Stored credential");
        Ok(summary)
    }

    pub async fn list(&self, user_id: &str) -> VaultResult<Vec<CredentialSummary>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM credentials WHERE user_id = ?1 ORDER BY provider",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], summary_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn reveal(&self, user_id: &str, provider: Provider) -> VaultResult<Option<String>> {
        let sealed = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT encrypted_value, iv FROM credentials WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider.as_str()],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        iv: row.get(1)?,
                    })
                },
            )
            .optional()?
        };

        let Some(sealed) = sealed else {
            return Ok(None);
        };
        match self
            .cipher
            .decrypt(&sealed, &credential_aad(user_id, provider))
        {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) => {
                warn!(
                    user_id,
                    provider = provider.as_str(),
                    "Credential failed to decrypt: {}",
                    e
                );
                Err(VaultError::Undecryptable(provider.as_str().to_string()))
            }
        }
    }

    pub async fn remove(&self, user_id: &str, provider: Provider) -> VaultResult<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM credentials WHERE user_id = ?1 AND provider = ?2",
            params![user_id, provider.as_str()],
        )?;
        Ok(deleted > 0)
    }

    pub async fn record_test(&self, user_id: &str, provider: Provider, ok: bool) -> VaultResult<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE credentials SET last_tested_at = CURRENT_TIMESTAMP, last_test_ok = ?1
             WHERE user_id = ?2 AND provider = ?3",
            params![ok as i64, user_id, provider.as_str()],
        )?;
        Ok(updated > 0)
    }

    /// Decrypt every requested provider's key, keyed by the engine config name
    /// (`OPENAI_API_KEY`, ...). Fails listing all providers without a key.
    pub async fn resolve_for(
        &self,
        user_id: &str,
        providers: &[Provider],
    ) -> VaultResult<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for provider in providers {
            match self.reveal(user_id, *provider).await? {
                Some(secret) => {
                    resolved.insert(provider.config_key().to_string(), secret);
                }
                None => missing.push(provider.as_str().to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(VaultError::MissingCredentials(missing));
        }
        Ok(resolved)
    }

    /// Seal a secret system setting into the shape `system_config` stores.
    pub fn seal_setting(&self, key: &str, value: &str) -> VaultResult<Sealed> {
        self.cipher
            .encrypt(value, &setting_aad(key))
            .map_err(|e| VaultError::Crypto(e.to_string()))
    }

    /// Plain value of a setting row, decrypting it when it is marked secret.
    pub fn open_setting(&self, row: &SettingRow) -> VaultResult<String> {
        if !row.is_secret {
            return Ok(row.value.clone());
        }
        let sealed = Sealed {
            ciphertext: row.value.clone(),
            iv: row.iv.clone().unwrap_or_default(),
        };
        self.cipher
            .decrypt(&sealed, &setting_aad(&row.key))
            .map_err(|_| VaultError::Undecryptable(row.key.clone()))
    }
}

#[cfg(test)]
pub(crate) fn test_cipher() -> CredentialCipher {
    CredentialCipher::new(&[7u8; 32])
}

#[cfg(test)]
pub(crate) async fn test_vault(db: Arc<Mutex<Connection>>) -> CredentialVault {
    let vault = CredentialVault::new(db, test_cipher());
    vault.initialize().await.expect("init credentials table");
    vault
}
