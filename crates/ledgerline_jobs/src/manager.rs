//! Job manager.

use crate::config::JobConfig;
use crate::context::JobContext;
use crate::error::{JobError, JobsResult};
use crate::handler::JobHandler;
use crate::table::{JobEntry, SharedTable};
use ledgerline_protocol::{JobFailure, JobId, JobRequest, JobResult, JobState, JobStatus};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Accepts job requests and runs them in the background.
///
/// [`submit`](Self::submit) records the job as `Queued` and returns its id
/// at once. The job then runs on the tokio runtime, on a blocking thread,
/// while callers poll [`status`](Self::status).
pub struct JobManager {
    config: JobConfig,
    runtime: Handle,
    handlers: RwLock<Vec<Arc<dyn JobHandler>>>,
    table: SharedTable,
    permits: Arc<Semaphore>,
}

impl JobManager {
    /// Creates a job manager on the current tokio runtime.
    pub fn new(config: JobConfig) -> JobsResult<Self> {
        let runtime = Handle::try_current().map_err(|e| JobError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Creates a job manager on the given runtime.
    pub fn with_runtime(config: JobConfig, runtime: Handle) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            config,
            runtime,
            handlers: RwLock::new(Vec::new()),
            table: SharedTable::default(),
            permits,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Registers a handler. Earlier handlers take precedence.
    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        self.handlers.write().push(handler);
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Submits a job and returns its id without waiting for it to start.
    ///
    /// A request no handler accepts is recorded as failed with an
    /// `UNSUPPORTED` cause.
    pub fn submit(&self, request: JobRequest) -> JobId {
        let job_id = JobId::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.table.write().insert(JobEntry::new(
            JobStatus::queued(job_id, &request),
            Arc::clone(&cancelled),
        ));

        let handler = self
            .handlers
            .read()
            .iter()
            .find(|h| h.accepts(&request))
            .cloned();
        let Some(handler) = handler else {
            let error = JobError::Unsupported {
                kind: request.kind().to_string(),
            };
            warn!(%job_id, error = %error, "job rejected");
            self.table.write().finish(
                &job_id,
                JobState::Failed,
                None,
                Some(error.to_failure()),
                self.config.retain_finished,
            );
            return job_id;
        };

        info!(%job_id, kind = request.kind(), handler = handler.name(), "job queued");
        let ctx = JobContext::new(job_id, cancelled, Arc::clone(&self.table));
        self.runtime.spawn(run_job(
            handler,
            request,
            ctx,
            Arc::clone(&self.permits),
            Arc::clone(&self.table),
            self.config.retain_finished,
        ));
        job_id
    }

    /// Returns the status of a job.
    ///
    /// Finished jobs stay visible until they are evicted by newer ones.
    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.table
            .read()
            .get(job_id)
            .map(|entry| entry.status.clone())
    }

    /// Requests cancellation of a job.
    ///
    /// Returns false if the job is unknown or already finished. A queued job
    /// is cancelled before it starts; a running job stops at its next
    /// cancellation point, leaving only whole batches applied.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let table = self.table.read();
        match table.get(job_id) {
            Some(entry) if !entry.status.state.is_terminal() => {
                entry.cancelled.store(true, Ordering::SeqCst);
                info!(%job_id, "job cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Waits until a job finishes and returns its final status.
    pub async fn wait(&self, job_id: &JobId) -> JobsResult<JobStatus> {
        let mut state_rx = {
            let table = self.table.read();
            table
                .get(job_id)
                .ok_or(JobError::NotFound(*job_id))?
                .state_tx
                .subscribe()
        };
        while !state_rx.borrow_and_update().is_terminal() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        self.status(job_id).ok_or(JobError::NotFound(*job_id))
    }

    /// Returns the status of every known job.
    pub fn list(&self) -> Vec<JobStatus> {
        self.table.read().statuses().cloned().collect()
    }

    /// Returns the number of known jobs.
    pub fn job_count(&self) -> usize {
        self.table.read().len()
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("config", &self.config)
            .field("handlers", &self.handler_count())
            .field("jobs", &self.job_count())
            .finish_non_exhaustive()
    }
}

async fn run_job(
    handler: Arc<dyn JobHandler>,
    request: JobRequest,
    ctx: JobContext,
    permits: Arc<Semaphore>,
    table: SharedTable,
    retain: usize,
) {
    let job_id = ctx.job_id();
    let finish = |state: JobState, result: Option<JobResult>, error: Option<JobFailure>| {
        table.write().finish(&job_id, state, result, error, retain);
    };

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            let error = JobError::Join(e.to_string());
            finish(JobState::Failed, None, Some(error.to_failure()));
            return;
        }
    };

    if ctx.is_cancelled() {
        info!(%job_id, "job cancelled before start");
        finish(
            JobState::Cancelled,
            None,
            Some(JobError::Cancelled.to_failure()),
        );
        return;
    }

    table
        .write()
        .update(&job_id, |status| status.state = JobState::Running);
    info!(%job_id, handler = handler.name(), "job running");

    let blocking_ctx = ctx.clone();
    let outcome = tokio::task::spawn_blocking(move || handler.run(request, &blocking_ctx))
        .await
        .map_err(|e| JobError::Join(e.to_string()))
        .and_then(|result| result);

    match outcome {
        Ok(result) => {
            info!(%job_id, "job complete");
            finish(JobState::Complete, Some(result), None);
        }
        Err(e) if e.is_cancelled() => {
            info!(%job_id, "job cancelled");
            finish(JobState::Cancelled, None, Some(e.to_failure()));
        }
        Err(JobError::TypesFailed { failure, result }) => {
            warn!(%job_id, error = %failure, "job failed");
            finish(JobState::Failed, Some(result), Some(failure));
        }
        Err(e) => {
            warn!(%job_id, error = %e, "job failed");
            finish(JobState::Failed, None, Some(e.to_failure()));
        }
    }
}
