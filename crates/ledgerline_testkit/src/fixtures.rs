//! Observers, stores and configurations for tests.

use ledgerline_core::{ChangeObserver, Config, CoreError, CoreResult, Delivery, Outbox};
use ledgerline_migration::{MemoryRowStore, MigrationConfig, RetryConfig};
use ledgerline_protocol::{ChangeRecord, LocalStackMessage, MigrationType, Row, RowMetadata};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observer that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<ChangeRecord>>,
    locals: Mutex<Vec<LocalStackMessage>>,
}

impl RecordingObserver {
    /// Creates a new recording observer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the change records received, in order.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.changes.lock().clone()
    }

    /// Returns the local messages received, in order.
    pub fn locals(&self) -> Vec<LocalStackMessage> {
        self.locals.lock().clone()
    }

    /// Returns the number of change records received.
    pub fn change_count(&self) -> usize {
        self.changes.lock().len()
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.changes.lock().clear();
        self.locals.lock().clear();
    }
}

impl ChangeObserver for RecordingObserver {
    fn observe(&self, delivery: Delivery<'_>) -> CoreResult<()> {
        match delivery {
            Delivery::Change(record) => self.changes.lock().push(record.clone()),
            Delivery::Local(message) => self.locals.lock().push(message.clone()),
        }
        Ok(())
    }
}

/// Observer that rejects every delivery.
#[derive(Debug, Default)]
pub struct FailingObserver {
    calls: AtomicUsize,
}

impl FailingObserver {
    /// Creates a new failing observer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of deliveries attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChangeObserver for FailingObserver {
    fn observe(&self, _delivery: Delivery<'_>) -> CoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::observer("observer always fails"))
    }
}

/// Creates an in-memory outbox with a recording observer registered.
pub fn recorded_outbox() -> (Outbox, Arc<RecordingObserver>) {
    let outbox = Outbox::with_config(Config::new().enable_feed(false));
    let observer = RecordingObserver::new();
    outbox.register_observer(observer.clone());
    (outbox, observer)
}

/// Migration configuration that retries without sleeping.
pub fn fast_migration_config() -> MigrationConfig {
    MigrationConfig::new("testkit").with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(false),
    )
}

/// Creates a store holding `contents` (id to etag) for one type.
pub fn store_from_map(
    name: &str,
    migration_type: MigrationType,
    contents: &BTreeMap<u64, String>,
) -> MemoryRowStore {
    let store = MemoryRowStore::new(name);
    for (id, etag) in contents {
        store.put(
            migration_type,
            Row::new(*id, etag.clone(), etag.as_bytes().to_vec()),
        );
    }
    store
}

/// Creates a store with `rows_per_type` rows for every listed type.
pub fn populated_store(name: &str, types: &[MigrationType], rows_per_type: u64) -> MemoryRowStore {
    let store = MemoryRowStore::new(name);
    for migration_type in types {
        for id in 1..=rows_per_type {
            let etag = format!("{migration_type}-{id}-v1");
            store.put(*migration_type, Row::new(id, etag.clone(), etag.into_bytes()));
        }
    }
    store
}

/// Returns the fingerprints of a map, ascending by id.
pub fn metadata_of(contents: &BTreeMap<u64, String>) -> Vec<RowMetadata> {
    contents
        .iter()
        .map(|(id, etag)| RowMetadata::new(*id, etag.clone()))
        .collect()
}
