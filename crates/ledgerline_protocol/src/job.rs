//! Job request and status messages.
//!
//! Long-running bulk operations are submitted as a [`JobRequest`] and
//! observed by polling a [`JobStatus`] with the returned [`JobId`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::migration::{MigrationType, TypeReport, TypeStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a fresh random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| ProtocolError::unknown("job id", s))
    }
}

/// Typed payload of a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    /// Migrate every type of the catalog.
    MigrateAllTypes,
    /// Migrate the listed types, in catalog order.
    MigrateTypes {
        /// Types to migrate.
        types: Vec<MigrationType>,
    },
    /// Run a query and write the result as CSV.
    DownloadCsv {
        /// Table to read.
        table_id: String,
        /// Query text, passed through unparsed.
        query: String,
        /// Whether to emit a header row.
        include_header: bool,
    },
    /// Snapshot the current version of a table.
    CreateSnapshot {
        /// Table to snapshot.
        table_id: String,
        /// Optional version label.
        label: Option<String>,
    },
}

impl JobRequest {
    /// Returns a short name for the request kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::MigrateAllTypes => "migrate_all_types",
            JobRequest::MigrateTypes { .. } => "migrate_types",
            JobRequest::DownloadCsv { .. } => "download_csv",
            JobRequest::CreateSnapshot { .. } => "create_snapshot",
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, not yet started.
    Queued,
    /// Executing.
    Running,
    /// Finished with a result.
    Complete,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl JobState {
    /// Returns true if the job will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Progress counters of a running job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Units completed.
    pub current: u64,
    /// Units expected, when known.
    pub total: u64,
    /// Short human-readable description.
    pub message: String,
}

impl JobProgress {
    /// Creates a progress snapshot.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
        }
    }
}

/// Reference to a file produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHandleRef {
    /// File handle id in the external file store.
    pub file_handle_id: String,
    /// File name.
    pub file_name: String,
    /// Size in bytes, when known.
    pub content_size: Option<u64>,
}

impl FileHandleRef {
    /// Creates a file handle reference.
    pub fn new(file_handle_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_handle_id: file_handle_id.into(),
            file_name: file_name.into(),
            content_size: None,
        }
    }
}

/// Typed result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    /// Outcome of every migrated type.
    Migration {
        /// Per-type reports in catalog order.
        types: Vec<TypeReport>,
    },
    /// A CSV file was written.
    Csv {
        /// The written file.
        file: FileHandleRef,
        /// Number of data rows.
        row_count: u64,
    },
    /// A snapshot was taken.
    Snapshot {
        /// Table id.
        table_id: String,
        /// Version number assigned by the table store.
        version: u64,
    },
}

impl JobResult {
    /// Returns true if every type in a migration result verified.
    pub fn all_verified(&self) -> bool {
        match self {
            JobResult::Migration { types } => {
                types.iter().all(|t| t.status == TypeStatus::Verified)
            }
            _ => true,
        }
    }
}

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Checksums still disagreed after re-diffing. Data diverged.
    Consistency,
    /// Remote reads or writes kept failing.
    TransientIo,
    /// The job was cancelled.
    Cancelled,
    /// No handler accepts the request.
    Unsupported,
    /// Any other error.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consistency => write!(f, "CONSISTENCY"),
            Self::TransientIo => write!(f, "TRANSIENT_IO"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Unsupported => write!(f, "UNSUPPORTED"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Structured cause of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Category.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl JobFailure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Pollable status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Job id.
    pub job_id: JobId,
    /// Request kind.
    pub request_kind: String,
    /// Current state.
    pub state: JobState,
    /// Latest progress.
    pub progress: JobProgress,
    /// Result, set when `Complete`.
    pub result: Option<JobResult>,
    /// Cause, set when `Failed` or `Cancelled`.
    pub error: Option<JobFailure>,
}

impl JobStatus {
    /// Creates the status of a freshly queued job.
    pub fn queued(job_id: JobId, request: &JobRequest) -> Self {
        Self {
            job_id,
            request_kind: request.kind().to_string(),
            state: JobState::Queued,
            progress: JobProgress::default(),
            result: None,
            error: None,
        }
    }
}
