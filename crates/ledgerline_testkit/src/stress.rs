//! Stress helpers for the outbox and the migration engine.
//!
//! These drive heavy commit traffic and repeated migrations so tests can
//! check delivery and convergence under load.

use ledgerline_core::Outbox;
use ledgerline_migration::{MemoryRowStore, MigrationConfig, MigrationEngine};
use ledgerline_protocol::{ChangeType, MigrationType, ObjectType, Row};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions or migration rounds.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Changes registered per transaction.
    pub changes_per_txn: usize,
    /// Number of distinct object ids.
    pub object_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            changes_per_txn: 4,
            object_count: 100,
        }
    }
}

fn commit_one(outbox: &Outbox, txn_index: usize, config: &StressConfig) -> bool {
    outbox
        .transaction(|txn| {
            for c in 0..config.changes_per_txn {
                let id = (txn_index * config.changes_per_txn + c) % config.object_count.max(1);
                let change_type = if c % 2 == 0 {
                    ChangeType::Create
                } else {
                    ChangeType::Update
                };
                outbox
                    .messenger()
                    .send_change(txn, id.to_string(), ObjectType::Entity, change_type)?;
            }
            Ok(())
        })
        .is_ok()
}

/// Commits `config.operations` transactions on one thread.
pub fn stress_sequential_commits(outbox: &Outbox, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        if commit_one(outbox, i, config) {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressResult::new(successful, failed, start.elapsed())
}

/// Commits `config.operations` transactions spread over `config.threads`.
pub fn stress_concurrent_commits(outbox: Arc<Outbox>, config: &StressConfig) -> StressResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let outbox = Arc::clone(&outbox);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    if commit_one(&outbox, t * ops_per_thread + i, &config) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(ops_per_thread, Ordering::Relaxed);
        }
    }

    StressResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Alternates source edits with migrations of one type.
///
/// Each round rewrites a slice of the source and migrates it. A round
/// counts as successful when the type verifies.
pub fn stress_repeated_migrations(
    source: Arc<MemoryRowStore>,
    destination: Arc<MemoryRowStore>,
    migration_config: MigrationConfig,
    config: &StressConfig,
) -> StressResult {
    let engine = MigrationEngine::with_shared(migration_config, Arc::clone(&source), destination);
    let migration_type = MigrationType::Node;
    let object_count = config.object_count.max(1) as u64;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for round in 0..config.operations {
        for c in 0..config.changes_per_txn {
            let id = (round * config.changes_per_txn + c) as u64 % object_count;
            if (round + c) % 5 == 0 {
                source.remove(migration_type, id);
            } else {
                let etag = format!("r{round}-{id}");
                source.put(migration_type, Row::new(id, etag.clone(), etag.into_bytes()));
            }
        }

        match engine.migrate_types(&[migration_type]) {
            Ok(report) if report.is_success() => successful += 1,
            _ => failed += 1,
        }
    }

    StressResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fast_migration_config, recorded_outbox};

    #[test]
    fn sequential_commits_deliver_everything() {
        let (outbox, observer) = recorded_outbox();
        let config = StressConfig {
            operations: 50,
            changes_per_txn: 2,
            object_count: 1_000,
            ..Default::default()
        };

        let result = stress_sequential_commits(&outbox, &config);

        assert_eq!(result.successful_ops, 50);
        assert_eq!(observer.change_count(), 100);
    }

    #[test]
    fn concurrent_commits_succeed() {
        let (outbox, observer) = recorded_outbox();
        let config = StressConfig {
            operations: 40,
            threads: 4,
            changes_per_txn: 1,
            object_count: 1_000,
        };

        let result = stress_concurrent_commits(Arc::new(outbox), &config);

        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 40);
        assert_eq!(observer.change_count(), 40);
    }

    #[test]
    fn repeated_migrations_converge() {
        let source = Arc::new(MemoryRowStore::new("src"));
        let destination = Arc::new(MemoryRowStore::new("dst"));
        let config = StressConfig {
            operations: 10,
            changes_per_txn: 6,
            object_count: 20,
            ..Default::default()
        };

        let result =
            stress_repeated_migrations(Arc::clone(&source), Arc::clone(&destination), fast_migration_config(), &config);

        assert_eq!(result.failed_ops, 0);
        assert_eq!(
            source.metadata(MigrationType::Node),
            destination.metadata(MigrationType::Node)
        );
    }
}
