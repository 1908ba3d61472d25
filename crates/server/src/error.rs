//! Uniform error type returned by every route handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<services::error::IngestError> for ApiError {
    fn from(err: services::error::IngestError) -> Self {
        match err {
            services::error::IngestError::NotFound(msg) => ApiError::NotFound(msg),
            services::error::IngestError::PayloadRejected(msg) => ApiError::BadRequest(msg),
            services::error::IngestError::Storage(e) => ApiError::Database(e),
            services::error::IngestError::Serialization(e) => ApiError::BadRequest(e.to_string()),
            services::error::IngestError::InvalidState(msg) => ApiError::BadRequest(msg),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
