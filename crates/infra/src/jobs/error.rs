//! Errors returned synchronously by the job manager.
//!
//! Execution failures (nonzero exit, timeout, signals) never appear here;
//! they are recorded on the job and discovered by polling.

use dockjob_core::DomainError;

use super::config::ConfigError;
use super::store::JobStoreError;
use super::types::JobId;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Bad script path or arguments; nothing was recorded.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Store(JobStoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Submission outside a Tokio runtime; runners need one to live on.
    #[error("no async runtime available to run the job")]
    NoRuntime,

    #[error("job manager is shutting down")]
    ShuttingDown,
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Errors caused by the caller's input rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(self, JobError::Validation(_) | JobError::NotFound(_))
    }
}

impl From<JobStoreError> for JobError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => JobError::NotFound(id),
            other => JobError::Store(other),
        }
    }
}

impl From<DomainError> for JobError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => JobError::Validation(msg),
        }
    }
}
