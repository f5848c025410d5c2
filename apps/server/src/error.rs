use std::io::Error as IoError;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use autoping_service::{ServiceError, config};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("Service error: {0:#}")]
    Service(#[from] anyhow::Error),
}

/// Error returned by the job handlers, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ServiceError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotPermanentlyPaused(_)
            | ServiceError::PermanentlyPaused(_)
            | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ServiceError::Store(e) = &self.0 {
            tracing::error!("Request failed: {:#}", e);
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": self.0.to_string() }))
    }
}
