//! Migration engine state machine.

use crate::catalog::MigrationCatalog;
use crate::config::MigrationConfig;
use crate::diff::{DiffOp, MergeDiff};
use crate::error::{MigrationError, MigrationResult};
use crate::report::{MigrationReport, TypeFailure};
use crate::retry::Retrier;
use crate::store::RowStore;
use crate::stream::MetadataStream;
use ledgerline_protocol::{ChecksumRequest, MigrationType, RangeChecksum, TypeReport, TypeStatus};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The current state of the migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Engine is idle.
    Idle,
    /// Engine is comparing metadata.
    Diffing,
    /// Engine is writing a batch to the destination.
    Applying,
    /// Engine is comparing checksums.
    Verifying,
    /// The last run verified every type.
    Complete,
    /// The last run had a failed, skipped or cancelled type.
    Failed,
}

impl MigrationState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MigrationState::Diffing | MigrationState::Applying | MigrationState::Verifying
        )
    }

    /// Returns true if the engine can start a new run.
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about migration runs.
#[derive(Debug, Clone, Default)]
pub struct MigrationStats {
    /// Total number of runs started.
    pub runs_started: u64,
    /// Types verified.
    pub types_verified: u64,
    /// Types that failed.
    pub types_failed: u64,
    /// Types skipped because their primary failed.
    pub types_skipped: u64,
    /// Rows inserted into the destination.
    pub rows_inserted: u64,
    /// Rows updated in the destination.
    pub rows_updated: u64,
    /// Rows deleted from the destination.
    pub rows_deleted: u64,
    /// Batches applied.
    pub batches_applied: u64,
    /// Checksum verifications run.
    pub verifications: u64,
    /// Retries of store calls.
    pub retries: u64,
    /// Last run start time.
    pub last_run_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    /// Type being migrated.
    pub migration_type: MigrationType,
    /// Current phase.
    pub state: MigrationState,
    /// Position of the type in the run, starting at zero.
    pub type_index: usize,
    /// Number of types in the run.
    pub type_count: usize,
    /// Rows written for this type so far.
    pub rows_applied: u64,
}

/// Callback receiving progress notifications.
pub type ProgressCallback = Box<dyn Fn(&MigrationProgress) + Send + Sync>;

/// What a flushed batch does to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    Insert,
    Update,
    Delete,
}

/// Ids waiting to be flushed, one list per batch kind.
#[derive(Default)]
struct PendingBatches {
    inserts: Vec<u64>,
    updates: Vec<u64>,
    deletes: Vec<u64>,
}

impl PendingBatches {
    fn list(&mut self, kind: BatchKind) -> &mut Vec<u64> {
        match kind {
            BatchKind::Insert => &mut self.inserts,
            BatchKind::Update => &mut self.updates,
            BatchKind::Delete => &mut self.deletes,
        }
    }
}

/// Position of the type being migrated, for progress reports.
#[derive(Clone, Copy)]
struct TypeSlot {
    migration_type: MigrationType,
    index: usize,
    count: usize,
}

/// Migrates rows from a source store to a destination store.
///
/// Types are migrated one at a time in catalog order. For each type the
/// engine diffs the metadata of both stores, applies the differences in
/// batches and then compares range checksums. A mismatch triggers a fresh
/// diff of the whole type, up to [`MigrationConfig::max_verify_attempts`]
/// verifications, after which the type fails with
/// [`MigrationError::Consistency`]. A failed type causes its dependents to
/// be skipped; other types still run.
pub struct MigrationEngine<S: RowStore, D: RowStore> {
    config: MigrationConfig,
    source: Arc<S>,
    destination: Arc<D>,
    catalog: MigrationCatalog,
    state: RwLock<MigrationState>,
    stats: RwLock<MigrationStats>,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl<S: RowStore, D: RowStore> MigrationEngine<S, D> {
    /// Creates a new migration engine over the default catalog.
    pub fn new(config: MigrationConfig, source: S, destination: D) -> Self {
        Self::with_shared(config, Arc::new(source), Arc::new(destination))
    }

    /// Creates a new migration engine over shared stores.
    pub fn with_shared(config: MigrationConfig, source: Arc<S>, destination: Arc<D>) -> Self {
        Self {
            config,
            source,
            destination,
            catalog: MigrationCatalog::default(),
            state: RwLock::new(MigrationState::Idle),
            stats: RwLock::new(MigrationStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Replaces the catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: MigrationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets a progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MigrationProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Shares an existing cancel flag, e.g. one owned by a job.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Gets the catalog.
    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// Gets the source store.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Gets the destination store.
    pub fn destination(&self) -> &Arc<D> {
        &self.destination
    }

    /// Gets the current state.
    pub fn state(&self) -> MigrationState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> MigrationStats {
        self.stats.read().clone()
    }

    /// Requests cancellation. The run stops before its next batch.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns the cancel flag, for cancelling from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn check_cancelled(&self) -> MigrationResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: MigrationState) {
        *self.state.write() = state;
    }

    fn notify(&self, slot: TypeSlot, rows_applied: u64) {
        if let Some(callback) = &self.progress {
            callback(&MigrationProgress {
                migration_type: slot.migration_type,
                state: self.state(),
                type_index: slot.index,
                type_count: slot.count,
                rows_applied,
            });
        }
    }

    /// Migrates every type of the catalog.
    pub fn migrate_all(&self) -> MigrationResult<MigrationReport> {
        let catalog = self.catalog.clone();
        self.run(&catalog)
    }

    /// Migrates the given types in catalog order.
    ///
    /// A listed dependent whose primary is not listed runs as if its primary
    /// had been verified.
    pub fn migrate_types(&self, types: &[MigrationType]) -> MigrationResult<MigrationReport> {
        let catalog = self.catalog.restricted_to(types)?;
        self.run(&catalog)
    }

    fn run(&self, catalog: &MigrationCatalog) -> MigrationResult<MigrationReport> {
        if !self.state().can_start() {
            return Err(MigrationError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "migrate".into(),
            });
        }

        let start = Instant::now();
        {
            let mut stats = self.stats.write();
            stats.runs_started += 1;
            stats.last_run_time = Some(start);
        }
        info!(
            source = self.source.name(),
            destination = self.destination.name(),
            types = catalog.len(),
            "migration started"
        );

        let retrier = Retrier::new(self.config.retry.clone(), Arc::clone(&self.cancelled));
        let result = self.run_types(catalog, &retrier);
        self.stats.write().retries += retrier.retries();

        match result {
            Ok(mut report) => {
                report.duration = start.elapsed();
                let state = if report.is_success() {
                    MigrationState::Complete
                } else {
                    MigrationState::Failed
                };
                self.set_state(state);
                info!(
                    verified = report.types_with(TypeStatus::Verified).len(),
                    failed = report.failures.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "migration finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(MigrationState::Failed);
                self.stats.write().last_error = Some(e.to_string());
                warn!(error = %e, "migration stopped");
                Err(e)
            }
        }
    }

    fn run_types(
        &self,
        catalog: &MigrationCatalog,
        retrier: &Retrier,
    ) -> MigrationResult<MigrationReport> {
        let mut report = MigrationReport::new();
        let mut failed: HashSet<MigrationType> = HashSet::new();

        for (index, entry) in catalog.entries().iter().enumerate() {
            let migration_type = entry.migration_type;

            if let Some(primary) = entry.primary.filter(|p| failed.contains(p)) {
                warn!(migration_type = %migration_type, %primary, "skipping dependent of failed type");
                let mut skipped = TypeReport::new(migration_type, TypeStatus::Skipped);
                skipped.error = Some(format!("primary type {primary} failed"));
                report.types.push(skipped);
                self.stats.write().types_skipped += 1;
                continue;
            }

            self.check_cancelled()?;

            let slot = TypeSlot {
                migration_type,
                index,
                count: catalog.len(),
            };
            let mut type_report = TypeReport::new(migration_type, TypeStatus::Verified);
            match self.migrate_type(slot, retrier, &mut type_report) {
                Ok(()) => {
                    info!(
                        migration_type = %migration_type,
                        inserted = type_report.inserted,
                        updated = type_report.updated,
                        deleted = type_report.deleted,
                        attempts = type_report.verify_attempts,
                        "type verified"
                    );
                    self.stats.write().types_verified += 1;
                }
                Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
                Err(e) => {
                    error!(migration_type = %migration_type, error = %e, "type failed");
                    type_report.status = TypeStatus::Failed;
                    type_report.error = Some(e.to_string());
                    report
                        .failures
                        .push(TypeFailure::from_error(migration_type, &e));
                    failed.insert(migration_type);
                    let mut stats = self.stats.write();
                    stats.types_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
            report.types.push(type_report);
        }

        Ok(report)
    }

    fn migrate_type(
        &self,
        slot: TypeSlot,
        retrier: &Retrier,
        report: &mut TypeReport,
    ) -> MigrationResult<()> {
        loop {
            report.verify_attempts += 1;

            self.set_state(MigrationState::Diffing);
            self.notify(slot, report.rows_changed());
            self.apply_diff(slot, retrier, report)?;

            self.set_state(MigrationState::Verifying);
            self.notify(slot, report.rows_changed());
            let (source, destination) = self.verify(slot.migration_type, retrier)?;
            self.stats.write().verifications += 1;

            if source == destination {
                return Ok(());
            }

            warn!(
                migration_type = %slot.migration_type,
                attempt = report.verify_attempts,
                source = %source.checksum,
                destination = %destination.checksum,
                "checksum mismatch"
            );
            if report.verify_attempts >= self.config.max_verify_attempts {
                return Err(MigrationError::Consistency {
                    migration_type: slot.migration_type,
                    source_checksum: source.checksum,
                    destination_checksum: destination.checksum,
                    attempts: report.verify_attempts,
                });
            }
        }
    }

    fn apply_diff(
        &self,
        slot: TypeSlot,
        retrier: &Retrier,
        report: &mut TypeReport,
    ) -> MigrationResult<()> {
        let migration_type = slot.migration_type;
        let page_size = self.config.page_size;
        let source = MetadataStream::new(&*self.source, migration_type, page_size, retrier);
        let destination =
            MetadataStream::new(&*self.destination, migration_type, page_size, retrier);

        let mut pending = PendingBatches::default();
        for op in MergeDiff::new(source, destination) {
            let kind = match op? {
                DiffOp::Insert(id) => {
                    pending.inserts.push(id);
                    BatchKind::Insert
                }
                DiffOp::Update(id) => {
                    pending.updates.push(id);
                    BatchKind::Update
                }
                DiffOp::Delete(id) => {
                    pending.deletes.push(id);
                    BatchKind::Delete
                }
            };
            if pending.list(kind).len() >= self.config.batch_size {
                self.flush(slot, kind, pending.list(kind), retrier, report)?;
            }
        }

        for kind in [BatchKind::Insert, BatchKind::Update, BatchKind::Delete] {
            self.flush(slot, kind, pending.list(kind), retrier, report)?;
        }
        Ok(())
    }

    /// Applies one batch as a unit, with retry.
    fn flush(
        &self,
        slot: TypeSlot,
        kind: BatchKind,
        ids: &mut Vec<u64>,
        retrier: &Retrier,
        report: &mut TypeReport,
    ) -> MigrationResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.check_cancelled()?;
        self.set_state(MigrationState::Applying);

        let migration_type = slot.migration_type;
        let batch = std::mem::take(ids);
        let written = match kind {
            BatchKind::Insert | BatchKind::Update => {
                let rows = retrier.run("get_rows", || self.source.get_rows(migration_type, &batch))?;
                if kind == BatchKind::Insert {
                    retrier.run("apply_insert_batch", || {
                        self.destination.apply_insert_batch(migration_type, &rows)
                    })?;
                } else {
                    retrier.run("apply_update_batch", || {
                        self.destination.apply_update_batch(migration_type, &rows)
                    })?;
                }
                rows.len() as u64
            }
            BatchKind::Delete => {
                retrier.run("apply_delete_batch", || {
                    self.destination.apply_delete_batch(migration_type, &batch)
                })?;
                batch.len() as u64
            }
        };

        {
            let mut stats = self.stats.write();
            stats.batches_applied += 1;
            match kind {
                BatchKind::Insert => {
                    report.inserted += written;
                    stats.rows_inserted += written;
                }
                BatchKind::Update => {
                    report.updated += written;
                    stats.rows_updated += written;
                }
                BatchKind::Delete => {
                    report.deleted += written;
                    stats.rows_deleted += written;
                }
            }
        }
        debug!(migration_type = %migration_type, ?kind, rows = written, "batch applied");

        self.notify(slot, report.rows_changed());
        self.set_state(MigrationState::Diffing);
        Ok(())
    }

    /// Checksums both stores over the union of their id spans.
    fn verify(
        &self,
        migration_type: MigrationType,
        retrier: &Retrier,
    ) -> MigrationResult<(RangeChecksum, RangeChecksum)> {
        let source_span = retrier.run("id_range", || self.source.id_range(migration_type))?;
        let destination_span =
            retrier.run("id_range", || self.destination.id_range(migration_type))?;

        let (min_id, max_id) = match (source_span, destination_span) {
            (Some((a, b)), Some((c, d))) => (a.min(c), b.max(d)),
            (Some(span), None) | (None, Some(span)) => span,
            (None, None) => (0, 0),
        };

        let request = ChecksumRequest::new(migration_type, self.config.salt.clone(), min_id, max_id);
        let source = retrier.run("checksum_for_range", || self.source.checksum_for_range(&request))?;
        let destination = retrier.run("checksum_for_range", || {
            self.destination.checksum_for_range(&request)
        })?;
        Ok((source, destination))
    }
}

impl<S: RowStore, D: RowStore> std::fmt::Debug for MigrationEngine<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("source", &self.source.name())
            .field("destination", &self.destination.name())
            .field("state", &self.state())
            .field("types", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::store::{MemoryRowStore, StoreOp};
    use std::time::Duration;

    const T: MigrationType = MigrationType::Principal;

    fn config() -> MigrationConfig {
        MigrationConfig::new("test").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::ZERO)
                .with_jitter(false),
        )
    }

    fn engine(
        source: MemoryRowStore,
        destination: MemoryRowStore,
    ) -> MigrationEngine<MemoryRowStore, MemoryRowStore> {
        MigrationEngine::new(config(), source, destination)
    }

    #[test]
    fn initial_state() {
        let engine = engine(MemoryRowStore::new("a"), MemoryRowStore::new("b"));
        assert_eq!(engine.state(), MigrationState::Idle);
        assert!(engine.state().can_start());
        assert!(!MigrationState::Applying.can_start());
    }

    #[test]
    fn empty_stores_verify_every_type() {
        let engine = engine(MemoryRowStore::new("a"), MemoryRowStore::new("b"));
        let report = engine.migrate_all().unwrap();

        assert!(report.is_success());
        assert_eq!(report.types.len(), MigrationType::ALL.len());
        assert_eq!(engine.state(), MigrationState::Complete);
    }

    #[test]
    fn batches_respect_batch_size() {
        let rows: Vec<_> = (1..=25).map(|id| (id, "e")).collect();
        let source = MemoryRowStore::with_rows("src", T, &rows);
        let engine = MigrationEngine::new(
            config().with_batch_size(10),
            source,
            MemoryRowStore::new("dst"),
        );

        let report = engine.migrate_types(&[T]).unwrap();

        assert_eq!(report.get(T).unwrap().inserted, 25);
        let inserts: Vec<_> = engine
            .destination()
            .events()
            .into_iter()
            .filter(|e| e.op == StoreOp::Insert)
            .map(|e| e.count)
            .collect();
        assert_eq!(inserts, vec![10, 10, 5]);
        assert_eq!(engine.stats().batches_applied, 3);
    }

    #[test]
    fn lost_write_is_repaired_by_second_diff() {
        let source = MemoryRowStore::with_rows("src", T, &[(1, "a"), (2, "b")]);
        let destination = MemoryRowStore::new("dst");
        destination.lose_writes(T, 2, 1);
        let engine = engine(source, destination);

        let report = engine.migrate_types(&[T]).unwrap();

        let entry = report.get(T).unwrap();
        assert_eq!(entry.status, TypeStatus::Verified);
        assert_eq!(entry.verify_attempts, 2);
        assert_eq!(engine.destination().metadata(T), engine.source().metadata(T));
    }

    #[test]
    fn cancel_before_run() {
        let engine = engine(
            MemoryRowStore::with_rows("src", T, &[(1, "a")]),
            MemoryRowStore::new("dst"),
        );
        engine.cancel();

        assert!(matches!(engine.migrate_all(), Err(MigrationError::Cancelled)));
        assert_eq!(engine.state(), MigrationState::Failed);
        assert!(engine.destination().is_empty(T));

        engine.reset_cancel();
        assert!(engine.migrate_all().unwrap().is_success());
    }

    #[test]
    fn unknown_type_in_request() {
        let engine = engine(MemoryRowStore::new("a"), MemoryRowStore::new("b"))
            .with_catalog(
                MigrationCatalog::new(vec![crate::catalog::CatalogEntry::primary(T)]).unwrap(),
            );
        let err = engine.migrate_types(&[MigrationType::Node]).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidCatalog(_)));
    }
}
