//! API error type and its JSON rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::core::execution::ExecutionError;
use crate::core::providers::UnknownProvider;
use crate::core::store::ExecutionRecord;
use crate::core::vault::VaultError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("missing credentials for: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("execution failed")]
    ExecutionFailed(Box<ExecutionRecord>),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::Validation(vec![message.into()])
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::MissingCredentials(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_CREDENTIALS")
            }
            Self::ExecutionFailed(_) => (StatusCode::BAD_GATEWAY, "EXECUTION_FAILED"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let mut body = json!({
            "success": false,
            "code": code,
        });

        match &self {
            Self::Internal(e) => {
                // Details stay in the log.
                tracing::error!(error = %e, "Request failed");
                body["error"] = json!("Internal server error");
            }
            Self::Validation(errors) => {
                body["error"] = json!(self.to_string());
                body["details"] = json!(errors);
            }
            Self::MissingCredentials(missing) => {
                body["error"] = json!(self.to_string());
                body["missing"] = json!(missing);
            }
            Self::ExecutionFailed(record) => {
                body["error"] = json!(record.error.as_deref().unwrap_or("execution failed"));
                body["execution"] = json!(record);
            }
            _ => body["error"] = json!(self.to_string()),
        }

        (status, Json(body)).into_response()
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::NotFound(id) => ApiError::NotFound(format!("Agent '{}' not found", id)),
            ExecutionError::Forbidden => ApiError::Forbidden(
                "Purchase this agent or subscribe to run it".to_string(),
            ),
            ExecutionError::Validation(errors) => ApiError::Validation(errors),
            ExecutionError::MissingCredentials(missing) => ApiError::MissingCredentials(missing),
            ExecutionError::Failed(record) => ApiError::ExecutionFailed(record),
            ExecutionError::Vault(e) => e.into(),
            ExecutionError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidKey(msg) => ApiError::invalid(msg),
            VaultError::MissingCredentials(missing) => ApiError::MissingCredentials(missing),
            VaultError::Undecryptable(provider) => ApiError::Conflict(format!(
                "Stored key for '{}' can no longer be decrypted; save it again",
                provider
            )),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<UnknownProvider> for ApiError {
    fn from(err: UnknownProvider) -> Self {
        ApiError::invalid(err.to_string())
    }
}
