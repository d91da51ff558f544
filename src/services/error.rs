//! Error taxonomy shared by the file and share services.

use crate::services::object_store::ObjectStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("file is {size} bytes, the limit is {limit} bytes")]
    SizeExceeded { limit: u64, size: u64 },
    #[error("share ticket has expired or reached its download limit")]
    Expired,
    #[error("{0}")]
    InvalidInput(String),
    #[error("could not generate a unique share code after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
    #[error("storage failure: {0}")]
    Storage(#[source] ObjectStoreError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<ObjectStoreError> for ServiceError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(handle) => ServiceError::NotFound(format!("stored object `{handle}`")),
            other => ServiceError::Storage(other),
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
