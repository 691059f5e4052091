//! Configuration for the job manager.

/// Configuration for the job manager.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Maximum number of jobs running at once.
    pub max_concurrent_jobs: usize,
    /// Number of finished jobs whose status is kept for polling.
    pub retain_finished: usize,
}

impl JobConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_concurrent_jobs: 4,
            retain_finished: 1000,
        }
    }

    /// Sets the maximum number of concurrent jobs.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs.max(1);
        self
    }

    /// Sets the number of finished jobs kept.
    #[must_use]
    pub fn with_retain_finished(mut self, jobs: usize) -> Self {
        self.retain_finished = jobs;
        self
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = JobConfig::new()
            .with_max_concurrent_jobs(0)
            .with_retain_finished(5);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.retain_finished, 5);
        assert_eq!(JobConfig::default().max_concurrent_jobs, 4);
    }
}
