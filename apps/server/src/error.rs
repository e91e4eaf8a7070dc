use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::datastore::DatastoreError;
use crate::publisher::PublishError;

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Errors surfaced by the webhook ingress
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Datastore(_) => "DatastoreError",
            AppError::Publish(_) => "PublishError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Datastore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse {
            error: ErrorDetail {
                error_type: self.error_type().to_string(),
                message: self.to_string(),
            },
        };

        HttpResponse::build(self.status_code()).json(response)
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
