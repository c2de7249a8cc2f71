use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use auth_check::AuthError;

use crate::db::DbError;
use crate::media::faststart::OptimizeError;
use crate::media::probe::InspectError;
use crate::models::ErrorResponse;
use crate::object_key::KeyError;
use crate::upload::StoreError;

/// Every way an upload request can fail. Each variant maps to one status code
/// and a short message for the client; the underlying cause is only logged.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid video id {0:?}")]
    InvalidIdentifier(String),
    #[error("authentication failed: {0}")]
    Unauthenticated(#[source] AuthError),
    #[error("user does not own the video")]
    Unauthorized,
    #[error("video not found")]
    VideoNotFound,
    #[error("multipart field {0:?} missing")]
    MissingUpload(&'static str),
    #[error("malformed multipart body: {0}")]
    MalformedUpload(#[source] MultipartError),
    #[error("unsupported media type {0:?}")]
    InvalidMediaType(String),
    #[error("upload exceeds {0} bytes")]
    UploadTooLarge(u64),
    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
    #[error("failed to inspect video: {0}")]
    Inspection(#[from] InspectError),
    #[error("failed to optimize video: {0}")]
    Optimization(#[from] OptimizeError),
    #[error("failed to generate object key: {0}")]
    KeyGeneration(#[from] KeyError),
    #[error("failed to upload to object store: {0}")]
    Upload(#[from] StoreError),
    #[error("failed to persist video record: {0}")]
    Persistence(#[source] DbError),
    #[error("processing task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::InvalidIdentifier(_)
            | IngestError::MissingUpload(_)
            | IngestError::MalformedUpload(_)
            | IngestError::InvalidMediaType(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthenticated(_) | IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::VideoNotFound => StatusCode::NOT_FOUND,
            IngestError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Staging(_)
            | IngestError::Inspection(_)
            | IngestError::Optimization(_)
            | IngestError::KeyGeneration(_)
            | IngestError::Upload(_)
            | IngestError::Persistence(_)
            | IngestError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn client_message(&self) -> &'static str {
        match self {
            IngestError::InvalidIdentifier(_) => "Invalid ID",
            IngestError::Unauthenticated(AuthError::MissingToken) => "Couldn't find JWT",
            IngestError::Unauthenticated(_) => "Couldn't validate JWT",
            IngestError::Unauthorized => "User doesn't own video",
            IngestError::VideoNotFound => "Video not found",
            IngestError::MissingUpload(_) | IngestError::MalformedUpload(_) => "Couldn't get file data",
            IngestError::InvalidMediaType(_) => "Invalid media type",
            IngestError::UploadTooLarge(_) => "File is too large",
            IngestError::Staging(_) => "Error writing to file",
            IngestError::Inspection(_) => "Error calculating video ratio",
            IngestError::Optimization(_) => "Error processing video",
            IngestError::KeyGeneration(_) => "Error generating random key",
            IngestError::Upload(_) => "Failed to put file in bucket",
            IngestError::Persistence(_) => "Error updating video record",
            IngestError::Worker(_) => "Error processing video",
        }
    }
}

impl From<DbError> for IngestError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => IngestError::VideoNotFound,
            other => IngestError::Persistence(other),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}: {}", self.client_message(), self);
        } else {
            tracing::warn!("{}: {}", self.client_message(), self);
        }

        let body = Json(ErrorResponse {
            error: self.client_message().to_string(),
        });
        (status, body).into_response()
    }
}
