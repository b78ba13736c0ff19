use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::Store;
use super::types::SettingRow;
use crate::core::vault::CredentialVault;

pub const MASKED_VALUE: &str = "********";

/// A setting as the admin API shows it: secrets are masked.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingView {
    pub key: String,
    pub value: String,
    pub is_secret: bool,
    pub updated_at: String,
}

fn setting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingRow> {
    Ok(SettingRow {
        key: row.get(0)?,
        value: row.get(1)?,
        iv: row.get(2)?,
        is_secret: row.get::<_, i64>(3)? != 0,
        updated_at: row.get(4)?,
    })
}

impl Store {
    pub async fn get_setting_row(&self, key: &str) -> Result<Option<SettingRow>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT key, value, iv, is_secret, updated_at FROM system_config WHERE key = ?1",
                params![key],
                setting_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Callers seal secret values first; this only stores what it is given.
    pub async fn put_setting_row(
        &self,
        key: &str,
        value: &str,
        iv: Option<&str>,
        is_secret: bool,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO system_config (key, value, iv, is_secret, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                iv = excluded.iv,
                is_secret = excluded.is_secret,
                updated_at = CURRENT_TIMESTAMP",
            params![key, value, iv, is_secret as i64],
        )?;
        Ok(())
    }

    pub async fn list_setting_rows(&self) -> Result<Vec<SettingRow>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT key, value, iv, is_secret, updated_at FROM system_config ORDER BY key",
        )?;
        let rows = stmt.query_map([], setting_from_row)?;
        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute("DELETE FROM system_config WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    /// Plain value of a setting, decrypted through the vault when secret.
    pub async fn get_setting(&self, vault: &CredentialVault, key: &str) -> Result<Option<String>> {
        match self.get_setting_row(key).await? {
            Some(row) => Ok(Some(vault.open_setting(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn set_setting(
        &self,
        vault: &CredentialVault,
        key: &str,
        value: &str,
        is_secret: bool,
    ) -> Result<()> {
        if is_secret {
            let sealed = vault.seal_setting(key, value)?;
            self.put_setting_row(key, &sealed.ciphertext, Some(&sealed.iv), true)
                .await
        } else {
            self.put_setting_row(key, value, None, false).await
        }
    }

    pub async fn list_settings(&self) -> Result<Vec<SettingView>> {
        Ok(self
            .list_setting_rows()
            .await?
            .into_iter()
            .map(|row| SettingView {
                value: if row.is_secret {
                    MASKED_VALUE.to_string()
                } else {
                    row.value
                },
                key: row.key,
                is_secret: row.is_secret,
                updated_at: row.updated_at,
            })
            .collect())
    }
}
