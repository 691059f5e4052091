//! Shared job table.

use ledgerline_protocol::{JobFailure, JobId, JobResult, JobState, JobStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;

pub(crate) type SharedTable = Arc<RwLock<JobTable>>;

/// A tracked job.
pub(crate) struct JobEntry {
    pub(crate) status: JobStatus,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) state_tx: watch::Sender<JobState>,
}

impl JobEntry {
    pub(crate) fn new(status: JobStatus, cancelled: Arc<AtomicBool>) -> Self {
        let (state_tx, _) = watch::channel(status.state);
        Self {
            status,
            cancelled,
            state_tx,
        }
    }
}

/// Every known job plus the order in which jobs finished.
#[derive(Default)]
pub(crate) struct JobTable {
    entries: HashMap<JobId, JobEntry>,
    finished: VecDeque<JobId>,
}

impl JobTable {
    pub(crate) fn insert(&mut self, entry: JobEntry) {
        self.entries.insert(entry.status.job_id, entry);
    }

    pub(crate) fn get(&self, job_id: &JobId) -> Option<&JobEntry> {
        self.entries.get(job_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn statuses(&self) -> impl Iterator<Item = &JobStatus> {
        self.entries.values().map(|entry| &entry.status)
    }

    /// Applies `f` to a job that has not finished.
    pub(crate) fn update<F>(&mut self, job_id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobStatus),
    {
        match self.entries.get_mut(job_id) {
            Some(entry) if !entry.status.state.is_terminal() => {
                let before = entry.status.state;
                f(&mut entry.status);
                if entry.status.state != before {
                    entry.state_tx.send_replace(entry.status.state);
                }
                true
            }
            _ => false,
        }
    }

    /// Moves a job to a terminal state, then evicts the oldest finished
    /// jobs beyond `retain`.
    pub(crate) fn finish(
        &mut self,
        job_id: &JobId,
        state: JobState,
        result: Option<JobResult>,
        error: Option<JobFailure>,
        retain: usize,
    ) {
        let finished = self.update(job_id, |status| {
            status.state = state;
            status.result = result;
            status.error = error;
        });
        if !finished {
            return;
        }

        self.finished.push_back(*job_id);
        while self.finished.len() > retain {
            if let Some(oldest) = self.finished.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_protocol::JobRequest;

    fn queued(table: &mut JobTable) -> JobId {
        let job_id = JobId::new();
        let status = JobStatus::queued(job_id, &JobRequest::MigrateAllTypes);
        table.insert(JobEntry::new(status, Arc::new(AtomicBool::new(false))));
        job_id
    }

    #[test]
    fn finished_jobs_do_not_change() {
        let mut table = JobTable::default();
        let job_id = queued(&mut table);
        let mut rx = table.get(&job_id).unwrap().state_tx.subscribe();

        table.finish(&job_id, JobState::Complete, None, None, 10);
        assert_eq!(*rx.borrow_and_update(), JobState::Complete);

        assert!(!table.update(&job_id, |s| s.state = JobState::Running));
        assert_eq!(table.get(&job_id).unwrap().status.state, JobState::Complete);
    }

    #[test]
    fn oldest_finished_jobs_are_evicted() {
        let mut table = JobTable::default();
        let ids: Vec<_> = (0..3).map(|_| queued(&mut table)).collect();
        let running = queued(&mut table);

        for id in &ids {
            table.finish(id, JobState::Complete, None, None, 2);
        }

        assert!(table.get(&ids[0]).is_none());
        assert!(table.get(&ids[1]).is_some());
        assert!(table.get(&running).is_some());
        assert_eq!(table.len(), 3);
    }
}
