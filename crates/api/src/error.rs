//! HTTP mapping for engine errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::EngineError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable code for programmatic handling.
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        let ApiError::Engine(err) = self;
        match err {
            EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            EngineError::WorkflowInactive(_) => (StatusCode::CONFLICT, "workflow_inactive"),
            EngineError::ExecutionFinalized(_) => (StatusCode::CONFLICT, "execution_finalized"),
            EngineError::TriggerMismatch { .. } => (StatusCode::CONFLICT, "trigger_mismatch"),
            EngineError::InvalidAction { .. }
            | EngineError::InvalidCron { .. }
            | EngineError::UnsupportedTrigger
            | EngineError::InvalidDefinition(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_workflow")
            }
            EngineError::Queue(_)
            | EngineError::Scheduler(_)
            | EngineError::Database(_)
            | EngineError::Serde(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        let body = ErrorResponse {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
