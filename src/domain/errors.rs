use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SchedulerError {
    /// Infrastructure failures leave the job where it is for later reconciliation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SchedulerError::Storage(_) | SchedulerError::Serialization(_)
        )
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SchedulerError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                SchedulerError::Storage(format!("Database error: {}", db_err.message()))
            }
            other => SchedulerError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
