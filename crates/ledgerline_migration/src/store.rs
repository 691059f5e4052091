//! Row stores the engine migrates between.

use crate::error::{MigrationError, MigrationResult};
use ledgerline_protocol::{ChecksumAccumulator, ChecksumRequest, MigrationType, RangeChecksum, Row, RowMetadata};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

/// One page of a metadata listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPage {
    /// Entries ascending by id. `None` marks a row the store filtered out;
    /// it occupies a position in the listing but takes no part in a diff.
    pub rows: Vec<Option<RowMetadata>>,
    /// Cursor for the next page, `None` once the listing is exhausted.
    pub next: Option<u64>,
}

impl MetadataPage {
    /// Returns a page with no entries and no continuation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

/// A source or destination of migrated rows.
///
/// Every batch call is applied as one unit: either all rows of the batch
/// are written or none are. Implementations report recoverable failures as
/// [`MigrationError::TransientIo`] so the engine can retry them.
pub trait RowStore: Send + Sync {
    /// Returns a name for logging.
    fn name(&self) -> &str;

    /// Lists metadata of a type with ids strictly greater than `after`.
    fn list_metadata(
        &self,
        migration_type: MigrationType,
        after: Option<u64>,
        limit: usize,
    ) -> MigrationResult<MetadataPage>;

    /// Fetches full rows by id. Unknown ids are left out of the result.
    fn get_rows(&self, migration_type: MigrationType, ids: &[u64]) -> MigrationResult<Vec<Row>>;

    /// Writes rows that do not yet exist.
    fn apply_insert_batch(&self, migration_type: MigrationType, rows: &[Row]) -> MigrationResult<()>;

    /// Overwrites existing rows.
    fn apply_update_batch(&self, migration_type: MigrationType, rows: &[Row]) -> MigrationResult<()>;

    /// Removes rows by id.
    fn apply_delete_batch(&self, migration_type: MigrationType, ids: &[u64]) -> MigrationResult<()>;

    /// Computes the checksum of the rows inside the requested range.
    fn checksum_for_range(&self, request: &ChecksumRequest) -> MigrationResult<RangeChecksum>;

    /// Returns the smallest and largest id of a type, if it has rows.
    fn id_range(&self, migration_type: MigrationType) -> MigrationResult<Option<(u64, u64)>>;
}

/// Store operations, used for failure injection and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `list_metadata`.
    ListMetadata,
    /// `get_rows`.
    GetRows,
    /// `apply_insert_batch`.
    Insert,
    /// `apply_update_batch`.
    Update,
    /// `apply_delete_batch`.
    Delete,
    /// `checksum_for_range`.
    Checksum,
    /// `id_range`.
    IdRange,
}

/// A successful call recorded by [`MemoryRowStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// The operation.
    pub op: StoreOp,
    /// The type it touched.
    pub migration_type: MigrationType,
    /// Rows read or written.
    pub count: usize,
}

type Table = BTreeMap<u64, Row>;

/// An in-memory [`RowStore`].
///
/// Besides plain storage it can hide rows behind a filter, fail calls with
/// transient errors and silently drop writes, which lets tests drive the
/// engine through its retry and verification paths.
pub struct MemoryRowStore {
    name: String,
    tables: RwLock<HashMap<MigrationType, Table>>,
    filtered: RwLock<HashSet<(MigrationType, u64)>>,
    failures: Mutex<HashMap<StoreOp, u32>>,
    lost_writes: Mutex<HashMap<(MigrationType, u64), u32>>,
    events: Mutex<Vec<StoreEvent>>,
}

impl MemoryRowStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            filtered: RwLock::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            lost_writes: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Creates a store holding the given `(id, etag)` pairs of one type.
    ///
    /// Each row's payload is its etag.
    pub fn with_rows(name: impl Into<String>, migration_type: MigrationType, rows: &[(u64, &str)]) -> Self {
        let store = Self::new(name);
        for (id, etag) in rows {
            store.put(migration_type, Row::new(*id, *etag, etag.as_bytes().to_vec()));
        }
        store
    }

    /// Inserts or replaces a row.
    pub fn put(&self, migration_type: MigrationType, row: Row) {
        self.tables
            .write()
            .entry(migration_type)
            .or_default()
            .insert(row.id, row);
    }

    /// Removes a row, returning it if it existed.
    pub fn remove(&self, migration_type: MigrationType, id: u64) -> Option<Row> {
        self.tables
            .write()
            .get_mut(&migration_type)
            .and_then(|table| table.remove(&id))
    }

    /// Hides a row from listings, checksums and id ranges.
    pub fn filter(&self, migration_type: MigrationType, id: u64) {
        self.filtered.write().insert((migration_type, id));
    }

    /// Makes the next `times` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        *self.failures.lock().entry(op).or_insert(0) += times;
    }

    /// Makes the next `times` writes of a row succeed without storing it.
    pub fn lose_writes(&self, migration_type: MigrationType, id: u64, times: u32) {
        *self
            .lost_writes
            .lock()
            .entry((migration_type, id))
            .or_insert(0) += times;
    }

    /// Returns a row.
    pub fn get(&self, migration_type: MigrationType, id: u64) -> Option<Row> {
        self.tables
            .read()
            .get(&migration_type)
            .and_then(|table| table.get(&id).cloned())
    }

    /// Returns every row of a type, filtered rows included.
    pub fn rows(&self, migration_type: MigrationType) -> Vec<Row> {
        self.tables
            .read()
            .get(&migration_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the fingerprints of the visible rows of a type.
    pub fn metadata(&self, migration_type: MigrationType) -> Vec<RowMetadata> {
        let filtered = self.filtered.read();
        self.rows(migration_type)
            .into_iter()
            .filter(|row| !filtered.contains(&(migration_type, row.id)))
            .map(|row| row.metadata())
            .collect()
    }

    /// Returns the number of rows of a type, filtered rows included.
    pub fn len(&self, migration_type: MigrationType) -> usize {
        self.tables
            .read()
            .get(&migration_type)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the store holds no rows of a type.
    pub fn is_empty(&self, migration_type: MigrationType) -> bool {
        self.len(migration_type) == 0
    }

    /// Returns the calls that succeeded, in order.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    /// Clears the event log.
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn maybe_fail(&self, op: StoreOp) -> MigrationResult<()> {
        let mut failures = self.failures.lock();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(MigrationError::transient(format!(
                    "{}: injected {op:?} failure",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    fn record(&self, op: StoreOp, migration_type: MigrationType, count: usize) {
        self.events.lock().push(StoreEvent {
            op,
            migration_type,
            count,
        });
    }

    fn is_filtered(&self, migration_type: MigrationType, id: u64) -> bool {
        self.filtered.read().contains(&(migration_type, id))
    }

    fn take_lost_write(&self, migration_type: MigrationType, id: u64) -> bool {
        let mut lost = self.lost_writes.lock();
        match lost.get_mut(&(migration_type, id)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn write_rows(&self, op: StoreOp, migration_type: MigrationType, rows: &[Row]) -> MigrationResult<()> {
        self.maybe_fail(op)?;
        let kept: Vec<&Row> = rows
            .iter()
            .filter(|row| !self.take_lost_write(migration_type, row.id))
            .collect();
        {
            let mut tables = self.tables.write();
            let table = tables.entry(migration_type).or_default();
            for row in kept {
                table.insert(row.id, row.clone());
            }
        }
        self.record(op, migration_type, rows.len());
        Ok(())
    }
}

impl RowStore for MemoryRowStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_metadata(
        &self,
        migration_type: MigrationType,
        after: Option<u64>,
        limit: usize,
    ) -> MigrationResult<MetadataPage> {
        self.maybe_fail(StoreOp::ListMetadata)?;
        if limit == 0 {
            return Err(MigrationError::store("page limit must be positive"));
        }

        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let tables = self.tables.read();
        let Some(table) = tables.get(&migration_type) else {
            return Ok(MetadataPage::empty());
        };

        let mut scanned = table.range((lower, Bound::Unbounded));
        let mut page = MetadataPage::empty();
        let mut last = None;
        for (id, row) in scanned.by_ref().take(limit) {
            last = Some(*id);
            page.rows.push(if self.is_filtered(migration_type, *id) {
                None
            } else {
                Some(row.metadata())
            });
        }
        if scanned.next().is_some() {
            page.next = last;
        }
        drop(tables);

        self.record(StoreOp::ListMetadata, migration_type, page.rows.len());
        Ok(page)
    }

    fn get_rows(&self, migration_type: MigrationType, ids: &[u64]) -> MigrationResult<Vec<Row>> {
        self.maybe_fail(StoreOp::GetRows)?;
        let rows: Vec<Row> = {
            let tables = self.tables.read();
            match tables.get(&migration_type) {
                Some(table) => ids.iter().filter_map(|id| table.get(id).cloned()).collect(),
                None => Vec::new(),
            }
        };
        self.record(StoreOp::GetRows, migration_type, rows.len());
        Ok(rows)
    }

    fn apply_insert_batch(&self, migration_type: MigrationType, rows: &[Row]) -> MigrationResult<()> {
        self.write_rows(StoreOp::Insert, migration_type, rows)
    }

    fn apply_update_batch(&self, migration_type: MigrationType, rows: &[Row]) -> MigrationResult<()> {
        self.write_rows(StoreOp::Update, migration_type, rows)
    }

    fn apply_delete_batch(&self, migration_type: MigrationType, ids: &[u64]) -> MigrationResult<()> {
        self.maybe_fail(StoreOp::Delete)?;
        if let Some(table) = self.tables.write().get_mut(&migration_type) {
            for id in ids {
                table.remove(id);
            }
        }
        self.record(StoreOp::Delete, migration_type, ids.len());
        Ok(())
    }

    fn checksum_for_range(&self, request: &ChecksumRequest) -> MigrationResult<RangeChecksum> {
        request.validate()?;
        self.maybe_fail(StoreOp::Checksum)?;

        let mut acc = ChecksumAccumulator::new(&request.salt);
        if let Some(table) = self.tables.read().get(&request.migration_type) {
            for (id, row) in table.range(request.min_id..=request.max_id) {
                if !self.is_filtered(request.migration_type, *id) {
                    acc.add(*id, &row.etag);
                }
            }
        }
        self.record(StoreOp::Checksum, request.migration_type, acc.count() as usize);
        Ok(acc.finish())
    }

    fn id_range(&self, migration_type: MigrationType) -> MigrationResult<Option<(u64, u64)>> {
        self.maybe_fail(StoreOp::IdRange)?;
        let range = {
            let tables = self.tables.read();
            tables.get(&migration_type).and_then(|table| {
                let mut visible = table
                    .keys()
                    .copied()
                    .filter(|id| !self.is_filtered(migration_type, *id));
                let first = visible.next()?;
                let last = visible.last().unwrap_or(first);
                Some((first, last))
            })
        };
        self.record(StoreOp::IdRange, migration_type, usize::from(range.is_some()));
        Ok(range)
    }
}

impl std::fmt::Debug for MemoryRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRowStore")
            .field("name", &self.name)
            .field("tables", &self.tables.read().len())
            .finish_non_exhaustive()
    }
}
