use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::AppState;
use super::super::auth::AuthUser;
use super::super::error::{ApiError, ApiResult};

#[derive(Deserialize, Default)]
pub struct ListAgentsQuery {
    /// Admins may include inactive listings.
    #[serde(default)]
    all: bool,
}

pub async fn get_agents(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<Value>> {
    let active_only = !(query.all && user.is_admin());
    let agents = state.store.list_agents(active_only).await?;

    let mut listed = Vec::with_capacity(agents.len());
    for agent in agents {
        let can_run = user.is_admin() || state.store.can_run_agent(&user.user_id, &agent).await?;
        let mut entry = json!(agent);
        entry["can_run"] = json!(can_run);
        listed.push(entry);
    }
    Ok(Json(json!({ "success": true, "agents": listed })))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent = match state.store.find_agent(&agent_id).await? {
        Some(agent) if agent.is_active || user.is_admin() => agent,
        _ => return Err(ApiError::NotFound(format!("Agent '{}' not found", agent_id))),
    };
    let can_run = user.is_admin() || state.store.can_run_agent(&user.user_id, &agent).await?;
    Ok(Json(json!({ "success": true, "agent": agent, "can_run": can_run })))
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    inputs: Value,
}

pub async fn execute_agent(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(agent_id): Path<String>,
    Json(payload): Json<ExecuteRequest>,
) -> ApiResult<Json<Value>> {
    let execution = state
        .executions
        .execute(&user.user_id, user.role, &agent_id, &payload.inputs)
        .await?;
    Ok(Json(json!({ "success": true, "execution": execution })))
}
