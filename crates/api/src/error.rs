//! Error types for the HTTP layer

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use feedback::FeedbackError;
use ingest::StorageError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A pipeline stage failed under the `fail_fast` policy.
    #[error("{}: {source}", .stage.failure_message())]
    Stage {
        stage: Stage,
        source: anyhow::Error,
    },

    #[error("Error downloading file: {0}")]
    Download(std::io::Error),

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Stage { source, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, Some(format!("{source:#}")))
            }
            ApiError::Download(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            ApiError::Multipart(err) => (err.status(), Some(err.body_text())),
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, Some(format!("{err:#}"))),
        };

        if status.is_server_error() {
            error!(error = %self, details = ?details, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedType(_) => ApiError::BadRequest("Unsupported file type".into()),
            StorageError::Io(e) => ApiError::Internal(anyhow::Error::new(e).context("Failed to store upload")),
        }
    }
}

impl From<FeedbackError> for ApiError {
    fn from(err: FeedbackError) -> Self {
        match err {
            FeedbackError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}
