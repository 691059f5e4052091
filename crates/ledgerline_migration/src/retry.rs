//! Retry loop for store calls.

use crate::config::RetryConfig;
use crate::error::{MigrationError, MigrationResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Runs store calls, retrying transient failures with backoff.
pub(crate) struct Retrier {
    config: RetryConfig,
    cancelled: Arc<AtomicBool>,
    retries: AtomicU64,
}

impl Retrier {
    pub(crate) fn new(config: RetryConfig, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            config,
            cancelled,
            retries: AtomicU64::new(0),
        }
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of
    /// attempts.
    pub(crate) fn run<T, F>(&self, label: &str, mut op: F) -> MigrationResult<T>
    where
        F: FnMut() -> MigrationResult<T>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        return Err(MigrationError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    if self.cancelled.load(Ordering::SeqCst) {
                        return Err(MigrationError::Cancelled);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(op = label, attempt, ?delay, error = %e, "retrying store call");
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the number of retries made so far.
    pub(crate) fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}
