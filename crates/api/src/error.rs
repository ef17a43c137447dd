use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use instafit_cloud::storage::StorageError;
use instafit_comfyui::job::JobError;
use instafit_comfyui::supervisor::EngineStartError;
use instafit_comfyui::template::TemplateLoadError;
use instafit_core::error::CoreError;
use instafit_pipeline::pipeline::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `instafit_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<EngineStartError> for AppError {
    fn from(err: EngineStartError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<TemplateLoadError> for AppError {
    fn from(err: TemplateLoadError) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                // Collaborator failures are surfaced: the client needs to know
                // which file or service failed.
                CoreError::Collaborator(msg) => {
                    tracing::warn!(error = %msg, "Collaborator error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "COLLABORATOR_ERROR",
                        msg.clone(),
                    )
                }
                CoreError::Protocol(msg) => {
                    tracing::error!(error = %msg, "Engine protocol error");
                    (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR", msg.clone())
                }
                CoreError::Resource(msg) => {
                    tracing::error!(error = %msg, "Resource unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "RESOURCE_UNAVAILABLE",
                        msg.clone(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
