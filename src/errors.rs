use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Which external reference failed to resolve during finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Student,
    Submission,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Student => write!(f, "student"),
            ReferenceKind::Submission => write!(f, "submission"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("chunk index {index} out of range for {total} chunks")]
    BadIndex { index: i64, total: i64 },
    #[error("upload `{0}` has no buffered fragments")]
    EmptyUpload(i64),
    #[error("{kind} `{id}` not found")]
    ReferenceNotFound { kind: ReferenceKind, id: i64 },
    #[error("file `{0}` not found")]
    NotFound(i64),
    #[error("upload `{0}` was abandoned and evicted; restart from chunk 0")]
    UploadAbandoned(i64),
    #[error("file `{0}` already exists")]
    AlreadyExists(i64),
    #[error("invalid file name or type")]
    InvalidFileName,
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error(transparent)]
    Storage(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::BadIndex { .. }
            | UploadError::EmptyUpload(_)
            | UploadError::InvalidFileName
            | UploadError::InvalidChunkSize => StatusCode::BAD_REQUEST,
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::ReferenceNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            UploadError::AlreadyExists(_) => StatusCode::CONFLICT,
            UploadError::UploadAbandoned(_) => StatusCode::GONE,
            UploadError::Storage(_) | UploadError::Database(_) => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
