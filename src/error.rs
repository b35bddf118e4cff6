use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::error_handling;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {0} is inactive")]
    SessionInactive(Uuid),

    #[error("product {0} not found")]
    ProductNotFound(String),

    #[error("no candidates matched the current filters and exclusions")]
    NoCandidates,

    #[error("{0} not found")]
    NotFound(String),

    #[error("unsupported API version: {0}")]
    UnsupportedVersion(String),

    #[error("model update failed: design matrix is singular")]
    ModelSingular,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with_details(
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Stable machine-readable kind, used in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::StartServer(_) => "internal",
            AppError::Validation { .. } => "validation",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionInactive(_) => "session_inactive",
            AppError::ProductNotFound(_) => "product_not_found",
            AppError::NoCandidates => "no_candidates",
            AppError::NotFound(_) => "not_found",
            AppError::UnsupportedVersion(_) => "unsupported_version",
            AppError::ModelSingular => "model_singular",
            AppError::Database(_) => "internal",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } | AppError::UnsupportedVersion(_) => 400,
            AppError::SessionNotFound(_)
            | AppError::ProductNotFound(_)
            | AppError::NotFound(_)
            | AppError::NoCandidates => 404,
            AppError::SessionInactive(_) => 410,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::ModelSingular
            | AppError::Database(_)
            | AppError::Internal(_) => 500,
        }
    }
}

impl From<crate::bandit::ModelError> for AppError {
    fn from(err: crate::bandit::ModelError) -> Self {
        match err {
            crate::bandit::ModelError::Singular => AppError::ModelSingular,
            crate::bandit::ModelError::DimensionMismatch { .. } => {
                AppError::validation(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}
