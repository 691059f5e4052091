//! Error types for the job facade.

use ledgerline_migration::MigrationError;
use ledgerline_protocol::{FailureKind, JobFailure, JobId, JobResult};
use thiserror::Error;

/// Result type for job operations.
pub type JobsResult<T> = Result<T, JobError>;

/// Errors that can occur while running jobs.
#[derive(Error, Debug)]
pub enum JobError {
    /// No job has this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// No registered handler accepts the request.
    #[error("no handler for {kind} requests")]
    Unsupported {
        /// Request kind.
        kind: String,
    },

    /// A handler received a request of a kind it does not run.
    #[error("handler cannot run {kind} requests")]
    WrongRequest {
        /// Request kind.
        kind: String,
    },

    /// The migration engine stopped.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// At least one type failed. The per-type outcomes are kept.
    #[error("{failure}")]
    TypesFailed {
        /// Cause of the first failed type.
        failure: JobFailure,
        /// Outcome of every type.
        result: JobResult,
    },

    /// An external service failed.
    #[error("service error: {0}")]
    Service(String),

    /// The job was cancelled.
    #[error("job cancelled")]
    Cancelled,

    /// No tokio runtime was available.
    #[error("no tokio runtime: {0}")]
    NoRuntime(String),

    /// The handler panicked or its task was aborted.
    #[error("job task failed: {0}")]
    Join(String),
}

impl JobError {
    /// Creates a service error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }

    /// Returns the failure category reported in the job status.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            JobError::Migration(e) => e.failure_kind(),
            JobError::TypesFailed { failure, .. } => failure.kind,
            JobError::Unsupported { .. } | JobError::WrongRequest { .. } => FailureKind::Unsupported,
            JobError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }

    /// Returns true if the error reports a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.failure_kind() == FailureKind::Cancelled
    }

    /// Converts the error into the failure stored in the job status.
    pub fn to_failure(&self) -> JobFailure {
        match self {
            JobError::TypesFailed { failure, .. } => failure.clone(),
            other => JobFailure::new(other.failure_kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds() {
        assert_eq!(
            JobError::from(MigrationError::Cancelled).failure_kind(),
            FailureKind::Cancelled
        );
        assert!(JobError::Cancelled.is_cancelled());
        assert_eq!(
            JobError::Unsupported {
                kind: "download_csv".into()
            }
            .failure_kind(),
            FailureKind::Unsupported
        );
        assert_eq!(
            JobError::service("disk quota").to_failure().kind,
            FailureKind::Internal
        );
    }

    #[test]
    fn type_failures_keep_their_cause() {
        let failure = JobFailure::new(FailureKind::Consistency, "NODE: checksum mismatch");
        let error = JobError::TypesFailed {
            failure: failure.clone(),
            result: JobResult::Migration { types: Vec::new() },
        };
        assert_eq!(error.to_failure(), failure);
        assert_eq!(error.to_string(), "CONSISTENCY: NODE: checksum mismatch");
    }
}
