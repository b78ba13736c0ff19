use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::super::auth::AuthUser;
use super::super::error::{ApiError, ApiResult};
use crate::core::providers::Provider;
use crate::core::vault::normalize_api_key;

pub async fn list_credentials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let credentials = state.vault.list(&user.user_id).await?;
    Ok(Json(json!({ "success": true, "credentials": credentials })))
}

#[derive(Deserialize)]
pub struct StoreCredentialRequest {
    provider: String,
    api_key: String,
    /// Probe the provider before saving and refuse keys it rejects.
    #[serde(default)]
    validate: bool,
}

pub async fn store_credential(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<StoreCredentialRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let provider: Provider = payload.provider.parse()?;
    let key = normalize_api_key(&payload.api_key)?;

    let probe = if payload.validate {
        let outcome = state.probes.probe(provider, &key).await;
        if !outcome.valid {
            return Err(ApiError::invalid(outcome.message));
        }
        Some(outcome)
    } else {
        None
    };

    let mut credential = state.vault.store(&user.user_id, provider, &key).await?;
    if probe.is_some() {
        state.vault.record_test(&user.user_id, provider, true).await?;
        if let Some(updated) = state
            .vault
            .list(&user.user_id)
            .await?
            .into_iter()
            .find(|c| c.provider == provider.as_str())
        {
            credential = updated;
        }
    }

    Ok(Json(json!({
        "success": true,
        "credential": credential,
        "probe": probe,
    })))
}

pub async fn delete_credential(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let provider: Provider = provider.parse()?;
    if !state.vault.remove(&user.user_id, provider).await? {
        return Err(ApiError::NotFound(format!(
            "No stored key for {}",
            provider.display_name()
        )));
    }
    Ok(Json(json!({ "success": true, "message": "Credential removed" })))
}

#[derive(Deserialize)]
pub struct TestCredentialRequest {
    provider: String,
    /// Probe this key instead of the stored one. Nothing is saved.
    #[serde(default)]
    api_key: Option<String>,
}

pub async fn test_credential(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<TestCredentialRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let provider: Provider = payload.provider.parse()?;

    let outcome = match payload.api_key.as_deref() {
        Some(raw) => {
            let key = normalize_api_key(raw)?;
            state.probes.probe(provider, &key).await
        }
        None => {
            let Some(key) = state.vault.reveal(&user.user_id, provider).await? else {
                return Err(ApiError::NotFound(format!(
                    "No stored key for {}",
                    provider.display_name()
                )));
            };
            let outcome = state.probes.probe(provider, &key).await;
            state
                .vault
                .record_test(&user.user_id, provider, outcome.valid)
                .await?;
            outcome
        }
    };

    Ok(Json(json!({
        "success": true,
        "valid": outcome.valid,
        "status": outcome.status,
        "message": outcome.message,
    })))
}
