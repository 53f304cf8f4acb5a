use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Typed error hierarchy for latchkey.
///
/// Use at module boundaries (approval, execution, RAG, HTTP handlers).
/// Leaf/internal plumbing can keep using `anyhow::Result` — the `Internal`
/// variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DraftLocked(String),

    #[error("{0}")]
    PlanViolation(String),

    #[error("{0}")]
    ConfirmationRequired(String),

    #[error("{0}")]
    InvalidToolInput(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("LLM generation failed: {0}")]
    LlmFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable machine-readable error codes, per the fixed HTTP status mapping.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    detail: String,
    error_code: ErrorCode,
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            AppError::DraftLocked(_) | AppError::PlanViolation(_) | AppError::ConfirmationRequired(_) => {
                (StatusCode::CONFLICT, ErrorCode::Conflict)
            }
            AppError::InvalidToolInput(_) | AppError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
            }
            AppError::ValidationError(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::ValidationError),
            AppError::LlmFailed(_) => (StatusCode::BAD_GATEWAY, ErrorCode::InternalError),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorEnvelope {
            detail: self.to_string(),
            error_code,
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_draft_locked_to_conflict() {
        let err = AppError::DraftLocked("Draft is locked".into());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, ErrorCode::Conflict);
    }

    #[test]
    fn maps_not_found_to_404() {
        let err = AppError::NotFound("Conversation not found".into());
        assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn maps_invalid_tool_input_to_400() {
        let err = AppError::InvalidToolInput("bad shape".into());
        assert_eq!(err.status_and_code().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_maps_to_500() {
        let err = AppError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(err.status_and_code().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
