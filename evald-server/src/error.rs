//! Server error types

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error body every failing endpoint returns.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub detail: String,
}

/// A handler failure, rendered as `{success: false, detail}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] evald_core::Error),

    /// Malformed path, query or body.
    #[error("{0}")]
    BadRequest(String),

    /// A dependency such as the GPU driver could not answer.
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use evald_core::Error as E;
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(err) => match err {
                E::NotFound { .. } => StatusCode::NOT_FOUND,
                E::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                E::InvalidState(_) => StatusCode::CONFLICT,
                E::ResourceExhausted(_) | E::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                E::Storage(_) | E::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<evald_core::storage::Error> for ApiError {
    fn from(err: evald_core::storage::Error) -> Self {
        Self::Core(err.into())
    }
}

impl From<evald_models::Error> for ApiError {
    fn from(err: evald_models::Error) -> Self {
        Self::Core(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = ErrorResponse {
            success: false,
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
