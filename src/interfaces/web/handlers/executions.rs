use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::super::AppState;
use super::super::auth::AuthUser;
use super::super::error::{ApiError, ApiResult};

pub const DEFAULT_PAGE: u32 = 20;
pub const MAX_PAGE: u32 = 100;

#[derive(Deserialize, Default)]
pub struct ListExecutionsQuery {
    limit: Option<u32>,
    /// Admins may list every user's runs.
    #[serde(default)]
    all: bool,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let scope = if query.all && user.is_admin() {
        None
    } else {
        Some(user.user_id.as_str())
    };
    let executions = state.store.list_executions(scope, limit).await?;
    Ok(Json(json!({ "success": true, "executions": executions })))
}

/// Other users' runs look exactly like missing ones.
pub async fn get_execution(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.store.get_execution(&id).await? {
        Some(execution) if execution.user_id == user.user_id || user.is_admin() => {
            Ok(Json(json!({ "success": true, "execution": execution })))
        }
        _ => Err(ApiError::NotFound(format!("Execution '{}' not found", id))),
    }
}
