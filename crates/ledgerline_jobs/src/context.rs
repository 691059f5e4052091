//! Per-job execution context.

use crate::error::{JobError, JobsResult};
use crate::table::{JobEntry, JobTable, SharedTable};
use ledgerline_protocol::{JobId, JobProgress, JobRequest, JobStatus};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a running handler can see of its job.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    cancelled: Arc<AtomicBool>,
    table: SharedTable,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, cancelled: Arc<AtomicBool>, table: SharedTable) -> Self {
        Self {
            job_id,
            cancelled,
            table,
        }
    }

    /// Creates a context that is not tracked by any manager.
    ///
    /// Useful for running a handler directly.
    pub fn detached(request: &JobRequest) -> Self {
        let job_id = JobId::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut table = JobTable::default();
        table.insert(JobEntry::new(
            JobStatus::queued(job_id, request),
            Arc::clone(&cancelled),
        ));
        Self::new(job_id, cancelled, Arc::new(RwLock::new(table)))
    }

    /// Returns the job id.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once cancellation was requested.
    pub fn check_cancelled(&self) -> JobsResult<()> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Returns the shared cancel flag.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Requests cancellation of this job.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Publishes progress. Ignored once the job has finished.
    pub fn report_progress(&self, progress: JobProgress) {
        self.table
            .write()
            .update(&self.job_id, |status| status.progress = progress);
    }

    /// Returns the latest published progress.
    pub fn progress(&self) -> Option<JobProgress> {
        self.table
            .read()
            .get(&self.job_id)
            .map(|entry| entry.status.progress.clone())
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_context_tracks_progress_and_cancel() {
        let ctx = JobContext::detached(&JobRequest::MigrateAllTypes);
        ctx.report_progress(JobProgress::new(1, 4, "PRINCIPAL"));
        assert_eq!(ctx.progress().unwrap().total, 4);

        assert!(ctx.check_cancelled().is_ok());
        ctx.clone().cancel();
        assert!(matches!(ctx.check_cancelled(), Err(JobError::Cancelled)));
    }
}
