use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::super::AppState;
use super::super::error::{ApiError, ApiResult};
use crate::core::config::validate_http_url;
use crate::core::execution::{ENGINE_API_KEY_KEY, ENGINE_BASE_URL_KEY, EXECUTION_TIMEOUT_KEY};
use crate::core::store::{
    AgentPatch, AgentRecord, AgentRemoval, InvalidTimestamp, NewAgent, is_constraint_violation,
};

async fn resolve_agent(state: &AppState, agent_id: &str) -> ApiResult<AgentRecord> {
    state
        .store
        .find_agent(agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Agent '{}' not found", agent_id)))
}

// --- Agents ---

pub async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<NewAgent>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    payload.validate().map_err(ApiError::Validation)?;
    match state.store.create_agent(&payload).await {
        Ok(agent) => {
            info!(slug = agent.slug.as_str(), "Agent created");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "success": true, "agent": agent })),
            ))
        }
        Err(e) if is_constraint_violation(&e) => Err(ApiError::Conflict(format!(
            "An agent with slug '{}' already exists",
            payload.slug
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> ApiResult<Json<Value>> {
    patch.validate().map_err(ApiError::Validation)?;
    let current = resolve_agent(&state, &agent_id).await?;
    let agent = state
        .store
        .update_agent(&current.id, &patch)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Agent '{}' not found", agent_id)))?;
    info!(slug = agent.slug.as_str(), "Agent updated");
    Ok(Json(json!({ "success": true, "agent": agent })))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let current = resolve_agent(&state, &agent_id).await?;
    let outcome = match state.store.delete_agent(&current.id).await? {
        AgentRemoval::Deleted => "deleted",
        AgentRemoval::Deactivated => "deactivated",
        AgentRemoval::NotFound => {
            return Err(ApiError::NotFound(format!("Agent '{}' not found", agent_id)));
        }
    };
    info!(slug = current.slug.as_str(), outcome, "Agent removed");
    Ok(Json(json!({ "success": true, "result": outcome })))
}

// --- Access grants ---

#[derive(Deserialize)]
pub struct GrantPurchaseRequest {
    user_id: String,
    agent_id: String,
    #[serde(default)]
    amount_cents: Option<i64>,
}

pub async fn grant_purchase(
    State(state): State<AppState>,
    Json(payload): Json<GrantPurchaseRequest>,
) -> ApiResult<Json<Value>> {
    if payload.user_id.trim().is_empty() {
        return Err(ApiError::invalid("user_id must not be empty"));
    }
    let agent = resolve_agent(&state, &payload.agent_id).await?;
    let amount = payload.amount_cents.unwrap_or(agent.price_cents);
    if amount < 0 {
        return Err(ApiError::invalid("amount_cents must not be negative"));
    }
    let purchase = state
        .store
        .grant_purchase(payload.user_id.trim(), &agent.id, amount)
        .await?;
    Ok(Json(json!({ "success": true, "purchase": purchase })))
}

#[derive(Deserialize)]
pub struct SubscriptionRequest {
    user_id: String,
    plan: String,
    status: String,
    #[serde(default)]
    current_period_end: Option<String>,
}

pub async fn upsert_subscription(
    State(state): State<AppState>,
    Json(payload): Json<SubscriptionRequest>,
) -> ApiResult<Json<Value>> {
    let mut errors = Vec::new();
    if payload.user_id.trim().is_empty() {
        errors.push("user_id must not be empty".to_string());
    }
    if payload.plan.trim().is_empty() {
        errors.push("plan must not be empty".to_string());
    }
    let status = payload.status.trim().to_lowercase();
    if status.is_empty() || !status.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        errors.push("status must be a lowercase word such as 'active'".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let result = state
        .store
        .upsert_subscription(
            payload.user_id.trim(),
            payload.plan.trim(),
            &status,
            payload.current_period_end.as_deref(),
        )
        .await;
    match result {
        Ok(subscription) => Ok(Json(json!({ "success": true, "subscription": subscription }))),
        Err(e) => match e.downcast_ref::<InvalidTimestamp>() {
            Some(bad) => Err(ApiError::invalid(format!("current_period_end: {}", bad))),
            None => Err(e.into()),
        },
    }
}

// --- System settings ---

pub async fn list_config(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings = state.store.list_settings().await?;
    Ok(Json(json!({ "success": true, "settings": settings })))
}

#[derive(Deserialize)]
pub struct SetConfigRequest {
    value: String,
    /// Defaults to true for keys that hold credentials.
    #[serde(default)]
    secret: Option<bool>,
}

fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    let key_ok = key.len() <= 64
        && key.starts_with(|c: char| c.is_ascii_lowercase())
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !key_ok {
        return Err("key must be lowercase letters, digits or '_' (max 64)".to_string());
    }
    match key {
        ENGINE_BASE_URL_KEY => validate_http_url(value).map_err(|e| e.to_string()),
        EXECUTION_TIMEOUT_KEY => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(()),
            _ => Err("execution_timeout_secs must be a positive integer".to_string()),
        },
        _ => Ok(()),
    }
}

pub async fn set_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<SetConfigRequest>,
) -> ApiResult<Json<Value>> {
    validate_setting(&key, &payload.value).map_err(ApiError::invalid)?;
    let secret = payload.secret.unwrap_or(key == ENGINE_API_KEY_KEY);
    state
        .store
        .set_setting(&state.vault, &key, payload.value.trim(), secret)
        .await?;
    info!(key = key.as_str(), secret, "Setting updated");
    Ok(Json(json!({ "success": true, "key": key, "is_secret": secret })))
}

pub async fn delete_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_setting(&key).await? {
        return Err(ApiError::NotFound(format!("Setting '{}' not found", key)));
    }
    Ok(Json(json!({ "success": true, "message": "Setting removed" })))
}
