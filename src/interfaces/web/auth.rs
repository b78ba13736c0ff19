use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use super::error::ApiError;
use crate::core::store::Role;

/// The caller behind a bearer token. Inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(raw_token) = bearer_token(&req) else {
        return ApiError::Unauthorized(
            "Missing or invalid Authorization header. Use: Bearer <token>".to_string(),
        )
        .into_response();
    };

    match state.store.resolve_api_token(&raw_token).await {
        Ok(Some(record)) => {
            req.extensions_mut().insert(AuthUser {
                user_id: record.user_id,
                role: record.role,
            });
            next.run(req).await
        }
        Ok(None) => ApiError::Unauthorized("Invalid or revoked API token".to_string())
            .into_response(),
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

/// Layered inside [`require_auth`] on admin routes.
pub async fn require_admin(req: Request<Body>, next: Next) -> Response {
    match req.extensions().get::<AuthUser>() {
        Some(user) if user.is_admin() => next.run(req).await,
        Some(_) => ApiError::Forbidden("Admin role required".to_string()).into_response(),
        None => ApiError::Unauthorized("Authentication required".to_string()).into_response(),
    }
}
