use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use faceverify_core::{DecodeError, EmbedError, InvalidEmbedding, SimilarityError};
use serde::Serialize;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Message returned to callers for every 5xx; the detail goes to the log.
const INTERNAL_MESSAGE: &str = "internal error while processing the request";

/// Every way a request can fail at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("missing required field '{0}'")]
    MissingInput(&'static str),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request body exceeds the {0} byte limit")]
    PayloadTooLarge(usize),

    #[error("could not decode image: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid stored embedding: {0}")]
    InvalidEmbedding(#[from] InvalidEmbedding),

    #[error("no face detected in the image")]
    NoFaceDetected,

    #[error("embedding has zero norm or is out of range and cannot be compared")]
    DegenerateEmbedding,

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingInput(_)
            | ServiceError::MalformedRequest(_)
            | ServiceError::Decode(_)
            | ServiceError::InvalidEmbedding(_)
            | ServiceError::NoFaceDetected
            | ServiceError::DegenerateEmbedding => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing message. Internal detail never leaves the process.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            ServiceError::Internal(detail) => tracing::error!(error = %detail, "request failed"),
            ServiceError::Timeout => tracing::warn!("request timed out"),
            other => tracing::debug!(error = %other, "request rejected"),
        }
    }

    fn into_body(self, is_match: Option<bool>) -> Response {
        self.log();
        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
            is_match,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_match: Option<bool>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_body(None)
    }
}

/// A failure on the comparison path. Same status mapping as
/// [`ServiceError`], but the body always carries `"is_match": false`.
#[derive(Debug)]
pub struct ComparisonError(pub ServiceError);

impl IntoResponse for ComparisonError {
    fn into_response(self) -> Response {
        self.0.into_body(Some(false))
    }
}

impl From<SimilarityError> for ServiceError {
    fn from(err: SimilarityError) -> Self {
        match err {
            SimilarityError::DegenerateEmbedding => ServiceError::DegenerateEmbedding,
            mismatch @ SimilarityError::DimensionMismatch { .. } => ServiceError::Internal(mismatch.to_string()),
        }
    }
}

impl From<EmbedError> for ServiceError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::NoFaceDetected => ServiceError::NoFaceDetected,
            EmbedError::Similarity(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Embed(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(format!("blocking task failed: {err}"))
    }
}
