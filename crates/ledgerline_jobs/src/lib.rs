//! # Ledgerline Jobs
//!
//! Submit-and-poll facade for long-running bulk operations.
//!
//! Submitting a [`JobRequest`](ledgerline_protocol::JobRequest) returns a
//! job id immediately. The job runs on a tokio runtime and its
//! [`JobStatus`](ledgerline_protocol::JobStatus) can be polled at any time
//! without side effects. Failed jobs carry a structured cause that tells a
//! checksum mismatch apart from an I/O failure.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerline_jobs::{JobConfig, JobManager, MigrationJobHandler};
//!
//! let manager = JobManager::new(JobConfig::default())?;
//! manager.register_handler(Arc::new(MigrationJobHandler::new(config, source, destination)));
//!
//! let job_id = manager.submit(JobRequest::MigrateAllTypes);
//! let status = manager.wait(&job_id).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod handler;
mod manager;
mod table;

pub use config::JobConfig;
pub use context::JobContext;
pub use error::{JobError, JobsResult};
pub use handler::{
    CsvDownloadJobHandler, CsvExport, CsvService, JobHandler, MigrationJobHandler,
    SnapshotJobHandler, SnapshotService,
};
pub use manager::JobManager;
