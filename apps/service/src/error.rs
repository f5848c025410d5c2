use thiserror::Error;

use crate::database::JobId;

/// Errors returned by the job commands
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} is not permanently paused")]
    NotPermanentlyPaused(JobId),

    #[error("job {0} is permanently paused; reset it instead")]
    PermanentlyPaused(JobId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
