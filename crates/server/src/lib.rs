//! HTTP server for the embodied conversational agent backend

pub mod http;
pub mod metrics;
pub mod registry;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use registry::{RegistryError, SessionRegistry};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use eca_core::{ArtifactError, StateError};

/// API-level errors mapped onto HTTP status codes.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::NotFound(err.to_string()),
            RegistryError::TurnInProgress { .. } => Self::Conflict(err.to_string()),
            RegistryError::Full(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(_) => Self::NotFound(err.to_string()),
            ArtifactError::InvalidReference(_) => Self::BadRequest(err.to_string()),
            ArtifactError::Presign(_) => Self::Forbidden(err.to_string()),
            ArtifactError::Unavailable(_) | ArtifactError::Io(_) => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::TurnNotFound(_) => Self::NotFound(err.to_string()),
            StateError::StatusConflict { .. } | StateError::AlreadyExists(_) => {
                Self::Conflict(err.to_string())
            }
            StateError::Unavailable(_) => Self::Unavailable(err.to_string()),
            StateError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}
