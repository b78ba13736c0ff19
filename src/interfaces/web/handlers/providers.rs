use axum::{Extension, Json, extract::State};
use serde_json::json;

use super::super::AppState;
use super::super::auth::AuthUser;
use super::super::error::ApiResult;
use crate::core::providers::Provider;

/// Supported providers, flagged with whether the caller has a key stored.
pub async fn get_providers(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let stored = state.vault.list(&user.user_id).await?;
    let providers: Vec<serde_json::Value> = Provider::ALL
        .iter()
        .map(|p| {
            json!({
                "id": p.as_str(),
                "name": p.display_name(),
                "config_key": p.config_key(),
                "configured": stored.iter().any(|c| c.provider == p.as_str()),
            })
        })
        .collect();
    Ok(Json(json!({ "success": true, "providers": providers })))
}
