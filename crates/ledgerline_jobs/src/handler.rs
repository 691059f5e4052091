//! Job handlers.
//!
//! A handler runs one kind of request on a blocking thread. Handlers for
//! snapshots and CSV downloads delegate the work to external services and
//! only translate requests and results.

use crate::context::JobContext;
use crate::error::{JobError, JobsResult};
use ledgerline_migration::{
    MigrationCatalog, MigrationConfig, MigrationEngine, MigrationProgress, RowStore,
};
use ledgerline_protocol::{FileHandleRef, JobProgress, JobRequest, JobResult};
use std::sync::Arc;
use tracing::debug;

/// Runs jobs of the request kinds it accepts.
pub trait JobHandler: Send + Sync {
    /// Returns a name for logging.
    fn name(&self) -> &str;

    /// Returns true if this handler runs the request.
    fn accepts(&self, request: &JobRequest) -> bool;

    /// Runs the request to completion.
    ///
    /// Called on a blocking thread. Long-running handlers should poll
    /// [`JobContext::check_cancelled`] between units of work.
    fn run(&self, request: JobRequest, ctx: &JobContext) -> JobsResult<JobResult>;
}

/// Runs migration requests over a pair of stores.
pub struct MigrationJobHandler<S: RowStore, D: RowStore> {
    config: MigrationConfig,
    source: Arc<S>,
    destination: Arc<D>,
    catalog: MigrationCatalog,
}

impl<S: RowStore, D: RowStore> MigrationJobHandler<S, D> {
    /// Creates a handler over the default catalog.
    pub fn new(config: MigrationConfig, source: Arc<S>, destination: Arc<D>) -> Self {
        Self {
            config,
            source,
            destination,
            catalog: MigrationCatalog::default(),
        }
    }

    /// Replaces the catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: MigrationCatalog) -> Self {
        self.catalog = catalog;
        self
    }
}

fn describe(progress: &MigrationProgress) -> JobProgress {
    JobProgress::new(
        progress.type_index as u64,
        progress.type_count as u64,
        format!(
            "{} {:?}, {} rows written",
            progress.migration_type, progress.state, progress.rows_applied
        ),
    )
}

impl<S: RowStore + 'static, D: RowStore + 'static> JobHandler for MigrationJobHandler<S, D> {
    fn name(&self) -> &str {
        "migration"
    }

    fn accepts(&self, request: &JobRequest) -> bool {
        matches!(
            request,
            JobRequest::MigrateAllTypes | JobRequest::MigrateTypes { .. }
        )
    }

    fn run(&self, request: JobRequest, ctx: &JobContext) -> JobsResult<JobResult> {
        let progress_ctx = ctx.clone();
        let engine = MigrationEngine::with_shared(
            self.config.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.destination),
        )
        .with_catalog(self.catalog.clone())
        .with_cancel_flag(ctx.cancel_flag())
        .with_progress(move |progress| progress_ctx.report_progress(describe(progress)));

        let report = match request {
            JobRequest::MigrateAllTypes => engine.migrate_all()?,
            JobRequest::MigrateTypes { types } => engine.migrate_types(&types)?,
            other => {
                return Err(JobError::WrongRequest {
                    kind: other.kind().to_string(),
                })
            }
        };

        let total = report.types.len() as u64;
        ctx.report_progress(JobProgress::new(total, total, "migration finished"));
        debug!(job_id = %ctx.job_id(), rows = report.rows_changed(), "migration job finished");

        let failure = report.first_failure().map(|f| f.to_job_failure());
        let result = JobResult::Migration {
            types: report.types,
        };
        match failure {
            Some(failure) => Err(JobError::TypesFailed { failure, result }),
            None => Ok(result),
        }
    }
}

/// Creates table snapshots.
pub trait SnapshotService: Send + Sync {
    /// Snapshots the current state of a table and returns the new version.
    fn create_snapshot(&self, table_id: &str, label: Option<&str>) -> JobsResult<u64>;
}

/// Runs snapshot requests.
pub struct SnapshotJobHandler<S: SnapshotService> {
    service: Arc<S>,
}

impl<S: SnapshotService> SnapshotJobHandler<S> {
    /// Creates a handler over a snapshot service.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

impl<S: SnapshotService> JobHandler for SnapshotJobHandler<S> {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn accepts(&self, request: &JobRequest) -> bool {
        matches!(request, JobRequest::CreateSnapshot { .. })
    }

    fn run(&self, request: JobRequest, ctx: &JobContext) -> JobsResult<JobResult> {
        let kind = request.kind();
        let JobRequest::CreateSnapshot { table_id, label } = request else {
            return Err(JobError::WrongRequest {
                kind: kind.to_string(),
            });
        };
        ctx.check_cancelled()?;

        let version = self.service.create_snapshot(&table_id, label.as_deref())?;
        ctx.report_progress(JobProgress::new(1, 1, format!("snapshot {version} of {table_id}")));
        Ok(JobResult::Snapshot { table_id, version })
    }
}

/// A written CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    /// Reference to the file in the file store.
    pub file: FileHandleRef,
    /// Number of data rows written.
    pub row_count: u64,
}

/// Runs queries and writes their results as CSV files.
pub trait CsvService: Send + Sync {
    /// Runs `query` against a table and stores the result as a CSV file.
    fn download_csv(&self, table_id: &str, query: &str, include_header: bool) -> JobsResult<CsvExport>;
}

/// Runs CSV download requests.
pub struct CsvDownloadJobHandler<S: CsvService> {
    service: Arc<S>,
}

impl<S: CsvService> CsvDownloadJobHandler<S> {
    /// Creates a handler over a CSV service.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

impl<S: CsvService> JobHandler for CsvDownloadJobHandler<S> {
    fn name(&self) -> &str {
        "csv_download"
    }

    fn accepts(&self, request: &JobRequest) -> bool {
        matches!(request, JobRequest::DownloadCsv { .. })
    }

    fn run(&self, request: JobRequest, ctx: &JobContext) -> JobsResult<JobResult> {
        let kind = request.kind();
        let JobRequest::DownloadCsv {
            table_id,
            query,
            include_header,
        } = request
        else {
            return Err(JobError::WrongRequest {
                kind: kind.to_string(),
            });
        };
        ctx.check_cancelled()?;

        let export = self.service.download_csv(&table_id, &query, include_header)?;
        ctx.report_progress(JobProgress::new(
            export.row_count,
            export.row_count,
            format!("wrote {}", export.file.file_name),
        ));
        Ok(JobResult::Csv {
            file: export.file,
            row_count: export.row_count,
        })
    }
}
