//! The change ledger.
//!
//! The ledger is the durable, numbered record of committed changes. It
//! keeps one live entry per object key: a newer change for the same object
//! replaces the older entry. Numbers become visible in increasing order: a
//! staged record whose number is not above the highest visible one is
//! numbered again when it is persisted. Consumers pull from it by change
//! number without missing commits that interleave, and
//! the publisher of external notifications uses the per-entry `sent` flag
//! as its recovery cursor.
//!
//! ```text
//! Commit path:
//!   before_commit → ledger.append(txn, record) → staged in txn
//!   commit        → ledger.persist_staged(txn) → visible
//!
//! Recovery path:
//!   ledger.list_unsent(n) → publish → ledger.mark_sent(type, page)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use ledgerline_protocol::{
    now_millis, ChangeNumber, ChangeRecord, ChecksumAccumulator, ObjectKey, ObjectType,
    RangeChecksum,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A committed change record and its delivery flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// The numbered record.
    pub record: ChangeRecord,
    /// Whether the record was published to external sinks.
    pub sent: bool,
}

impl LedgerEntry {
    /// Returns the change number of this entry.
    pub fn change_number(&self) -> ChangeNumber {
        self.record.change_number.unwrap_or(ChangeNumber::ZERO)
    }
}

/// Durable store of numbered change records.
pub trait ChangeLedger: Send + Sync {
    /// Numbers a record and stages it in the transaction.
    ///
    /// The record becomes visible when the transaction commits. Its number
    /// is consumed even if the transaction rolls back and is never reused.
    /// Fails with [`CoreError::Persistence`] when the transaction is no
    /// longer in progress.
    fn append(&self, txn: &mut Transaction, record: ChangeRecord) -> CoreResult<ChangeRecord>;

    /// Makes every record staged in the transaction visible.
    ///
    /// Called by the transaction manager during commit. An error rolls the
    /// transaction back. The records as persisted, with their final change
    /// numbers, are handed back through [`Transaction::set_persisted`].
    fn persist_staged(&self, txn: &mut Transaction) -> CoreResult<()>;

    /// Lists entries not yet published, oldest first.
    fn list_unsent(&self, limit: usize) -> CoreResult<Vec<LedgerEntry>>;

    /// Marks records of one type as published.
    ///
    /// Records whose number is no longer the live entry for their key, or
    /// whose type differs, are ignored. Returns how many entries changed
    /// from unsent to sent, so repeating a call returns zero.
    fn mark_sent(&self, object_type: ObjectType, records: &[ChangeRecord]) -> CoreResult<usize>;

    /// Lists live records with a change number greater than `after`.
    fn list_changes(
        &self,
        after: ChangeNumber,
        object_type: Option<ObjectType>,
        limit: usize,
    ) -> CoreResult<Vec<ChangeRecord>>;

    /// Computes a range checksum over live entries of one type.
    ///
    /// The row id is the numeric object id and the etag is the change
    /// number, so two ledgers agree exactly when they hold the same latest
    /// change for every object in range.
    fn checksum_for_range(
        &self,
        object_type: ObjectType,
        min_id: u64,
        max_id: u64,
        salt: &str,
    ) -> CoreResult<RangeChecksum>;

    /// Returns the highest change number handed out so far.
    fn current_change_number(&self) -> ChangeNumber;
}

#[derive(Default)]
struct LedgerTable {
    /// Live entries by change number.
    by_number: BTreeMap<ChangeNumber, LedgerEntry>,
    /// Live change number by object key.
    by_key: HashMap<ObjectKey, ChangeNumber>,
    /// Highest change number made visible so far.
    high_water: ChangeNumber,
}

impl LedgerTable {
    fn insert(&mut self, record: ChangeRecord) {
        let Some(number) = record.change_number else {
            return;
        };
        self.high_water = self.high_water.max(number);
        if let Some(previous) = self.by_key.insert(record.key(), number) {
            self.by_number.remove(&previous);
        }
        self.by_number.insert(
            number,
            LedgerEntry {
                record,
                sent: false,
            },
        );
    }
}

/// In-memory [`ChangeLedger`].
///
/// Change numbers come from an atomic counter, so concurrent appends never
/// share a number.
pub struct InMemoryLedger {
    next_number: AtomicU64,
    table: RwLock<LedgerTable>,
}

impl InMemoryLedger {
    /// Creates an empty ledger. The first change gets number 1.
    pub fn new() -> Self {
        Self::starting_at(ChangeNumber::new(1))
    }

    /// Creates an empty ledger whose first change gets `first`.
    pub fn starting_at(first: ChangeNumber) -> Self {
        Self {
            next_number: AtomicU64::new(first.as_u64().max(1)),
            table: RwLock::new(LedgerTable::default()),
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().by_number.len()
    }

    /// Returns true if the ledger holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live entry for an object.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<LedgerEntry> {
        let table = self.table.read();
        table
            .by_key
            .get(key)
            .and_then(|n| table.by_number.get(n))
            .cloned()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLedger for InMemoryLedger {
    fn append(&self, txn: &mut Transaction, mut record: ChangeRecord) -> CoreResult<ChangeRecord> {
        if !txn.is_in_progress() {
            return Err(CoreError::persistence(format!(
                "append for {}/{} outside of a transaction",
                record.object_type, record.object_id
            )));
        }
        record.validate()?;

        let number = ChangeNumber::new(self.next_number.fetch_add(1, Ordering::SeqCst));
        record.change_number = Some(number);
        record.timestamp = Some(now_millis());
        txn.stage(record.clone())?;
        Ok(record)
    }

    fn persist_staged(&self, txn: &mut Transaction) -> CoreResult<()> {
        let staged = txn.take_staged();
        if staged.is_empty() {
            return Ok(());
        }
        let count = staged.len();
        if let Some(unnumbered) = staged.iter().find(|r| !r.is_numbered()) {
            return Err(CoreError::persistence(format!(
                "cannot persist unnumbered change for {}/{}",
                unnumbered.object_type, unnumbered.object_id
            )));
        }

        let mut table = self.table.write();
        let mut persisted = Vec::with_capacity(count);
        for mut record in staged {
            if record.change_number.map_or(true, |n| n <= table.high_water) {
                let renumbered =
                    ChangeNumber::new(self.next_number.fetch_add(1, Ordering::SeqCst));
                debug!(
                    txn = %txn.id(),
                    object = ?record.key(),
                    from = ?record.change_number,
                    to = %renumbered,
                    "renumbered change committed after a newer one"
                );
                record.change_number = Some(renumbered);
            }
            table.insert(record.clone());
            persisted.push(record);
        }
        drop(table);
        txn.set_persisted(persisted);
        debug!(txn = %txn.id(), count, "persisted ledger entries");
        Ok(())
    }

    fn list_unsent(&self, limit: usize) -> CoreResult<Vec<LedgerEntry>> {
        let table = self.table.read();
        Ok(table
            .by_number
            .values()
            .filter(|e| !e.sent)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_sent(&self, object_type: ObjectType, records: &[ChangeRecord]) -> CoreResult<usize> {
        let mut table = self.table.write();
        let mut marked = 0;
        for record in records.iter().filter(|r| r.object_type == object_type) {
            let Some(number) = record.change_number else {
                continue;
            };
            if table.by_key.get(&record.key()) != Some(&number) {
                continue;
            }
            if let Some(entry) = table.by_number.get_mut(&number) {
                if !entry.sent {
                    entry.sent = true;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    fn list_changes(
        &self,
        after: ChangeNumber,
        object_type: Option<ObjectType>,
        limit: usize,
    ) -> CoreResult<Vec<ChangeRecord>> {
        let table = self.table.read();
        Ok(table
            .by_number
            .range(after.next()..)
            .map(|(_, e)| &e.record)
            .filter(|r| object_type.map_or(true, |t| r.object_type == t))
            .take(limit)
            .cloned()
            .collect())
    }

    fn checksum_for_range(
        &self,
        object_type: ObjectType,
        min_id: u64,
        max_id: u64,
        salt: &str,
    ) -> CoreResult<RangeChecksum> {
        if min_id > max_id {
            return Err(CoreError::invalid_argument(format!(
                "invalid id range: min {min_id} > max {max_id}"
            )));
        }
        let table = self.table.read();
        let mut acc = ChecksumAccumulator::new(salt);
        for entry in table.by_number.values() {
            if entry.record.object_type != object_type {
                continue;
            }
            let Ok(id) = entry.record.object_id.parse::<u64>() else {
                continue;
            };
            if id >= min_id && id <= max_id {
                acc.add(id, &entry.change_number().as_u64().to_string());
            }
        }
        Ok(acc.finish())
    }

    fn current_change_number(&self) -> ChangeNumber {
        ChangeNumber::new(self.next_number.load(Ordering::SeqCst).saturating_sub(1))
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("entries", &self.len())
            .field("current_change_number", &self.current_change_number())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;
    use std::sync::Arc;

    fn setup() -> (TransactionManager, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        (TransactionManager::new(ledger.clone()), ledger)
    }

    fn commit_records(tm: &TransactionManager, ledger: &InMemoryLedger, records: Vec<ChangeRecord>) {
        tm.transaction(|txn| {
            for record in records {
                ledger.append(txn, record)?;
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn append_numbers_monotonically() {
        let (tm, ledger) = setup();
        let mut txn = tm.begin();
        let a = ledger
            .append(&mut txn, ChangeRecord::create("1", ObjectType::Entity))
            .unwrap();
        let b = ledger
            .append(&mut txn, ChangeRecord::create("2", ObjectType::Entity))
            .unwrap();
        assert!(a.change_number < b.change_number);
        assert!(a.timestamp.is_some());
        assert_eq!(ledger.current_change_number(), ChangeNumber::new(2));
    }

    #[test]
    fn staged_entries_invisible_until_commit() {
        let (tm, ledger) = setup();
        let mut txn = tm.begin();
        ledger
            .append(&mut txn, ChangeRecord::create("1", ObjectType::Entity))
            .unwrap();
        assert!(ledger.is_empty());
        tm.commit(&mut txn).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn rolled_back_numbers_are_not_reused() {
        let (tm, ledger) = setup();
        let mut txn = tm.begin();
        let rolled = ledger
            .append(&mut txn, ChangeRecord::create("1", ObjectType::Entity))
            .unwrap();
        tm.abort(&mut txn).unwrap();
        assert!(ledger.is_empty());

        let mut txn = tm.begin();
        let kept = ledger
            .append(&mut txn, ChangeRecord::create("1", ObjectType::Entity))
            .unwrap();
        tm.commit(&mut txn).unwrap();
        assert!(kept.change_number > rolled.change_number);
    }

    #[test]
    fn append_outside_transaction_fails() {
        let (tm, ledger) = setup();
        let mut txn = tm.begin();
        tm.commit(&mut txn).unwrap();
        let err = ledger
            .append(&mut txn, ChangeRecord::create("1", ObjectType::Entity))
            .unwrap_err();
        assert!(matches!(err, CoreError::Persistence { .. }));
    }

    #[test]
    fn newer_change_replaces_entry_for_key() {
        let (tm, ledger) = setup();
        commit_records(&tm, &ledger, vec![ChangeRecord::create("1", ObjectType::Entity)]);
        let first = ledger.list_unsent(10).unwrap();
        ledger.mark_sent(ObjectType::Entity, &[first[0].record.clone()]).unwrap();

        commit_records(&tm, &ledger, vec![ChangeRecord::update("1", ObjectType::Entity)]);

        assert_eq!(ledger.len(), 1);
        let entry = ledger.get(&ObjectKey::new("1", ObjectType::Entity)).unwrap();
        assert_eq!(entry.record.change_type, ledgerline_protocol::ChangeType::Update);
        assert!(!entry.sent);
    }

    #[test]
    fn out_of_order_commits_keep_the_newest_number_live() {
        let (tm, ledger) = setup();
        let mut first = tm.begin();
        let mut second = tm.begin();
        let a = ledger
            .append(&mut first, ChangeRecord::update("1", ObjectType::Entity))
            .unwrap();
        let b = ledger
            .append(&mut second, ChangeRecord::update("1", ObjectType::Entity))
            .unwrap();
        assert!(a.change_number < b.change_number);

        tm.commit(&mut second).unwrap();
        let cursor = ledger.list_changes(ChangeNumber::ZERO, None, 10).unwrap()[0]
            .change_number
            .unwrap();
        tm.commit(&mut first).unwrap();

        let live = ledger.get(&ObjectKey::new("1", ObjectType::Entity)).unwrap();
        assert!(live.change_number() > cursor);
        assert_eq!(first.persisted()[0].change_number, Some(live.change_number()));
        let seen = ledger.list_changes(cursor, None, 10).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].change_number, Some(live.change_number()));
    }

    #[test]
    fn interleaved_commits_are_visible_in_increasing_order() {
        let (tm, ledger) = setup();
        let mut txns: Vec<_> = (0..4).map(|_| tm.begin()).collect();
        for (i, txn) in txns.iter_mut().enumerate() {
            ledger
                .append(txn, ChangeRecord::update(format!("{}", i % 2), ObjectType::Table))
                .unwrap();
        }

        let mut visible = Vec::new();
        for txn in txns.iter_mut().rev() {
            tm.commit(txn).unwrap();
            visible.push(txn.persisted()[0].change_number.unwrap());
        }

        assert!(visible.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn mark_sent_is_idempotent() {
        let (tm, ledger) = setup();
        commit_records(
            &tm,
            &ledger,
            vec![
                ChangeRecord::create("1", ObjectType::Entity),
                ChangeRecord::create("2", ObjectType::Entity),
            ],
        );
        let page: Vec<_> = ledger
            .list_unsent(10)
            .unwrap()
            .into_iter()
            .map(|e| e.record)
            .collect();

        assert_eq!(ledger.mark_sent(ObjectType::Entity, &page).unwrap(), 2);
        let after_once = ledger.list_unsent(10).unwrap();
        assert_eq!(ledger.mark_sent(ObjectType::Entity, &page).unwrap(), 0);
        assert_eq!(ledger.list_unsent(10).unwrap(), after_once);
        assert!(after_once.is_empty());
    }

    #[test]
    fn mark_sent_ignores_stale_and_foreign_records() {
        let (tm, ledger) = setup();
        commit_records(&tm, &ledger, vec![ChangeRecord::create("1", ObjectType::Entity)]);
        let stale = ledger.list_unsent(1).unwrap()[0].record.clone();
        commit_records(&tm, &ledger, vec![ChangeRecord::update("1", ObjectType::Entity)]);

        assert_eq!(ledger.mark_sent(ObjectType::Entity, &[stale]).unwrap(), 0);
        let live = ledger.list_unsent(1).unwrap()[0].record.clone();
        assert_eq!(ledger.mark_sent(ObjectType::Table, &[live]).unwrap(), 0);
        assert_eq!(ledger.list_unsent(10).unwrap().len(), 1);
    }

    #[test]
    fn list_unsent_oldest_first() {
        let (tm, ledger) = setup();
        commit_records(
            &tm,
            &ledger,
            vec![
                ChangeRecord::create("b", ObjectType::Entity),
                ChangeRecord::create("a", ObjectType::Entity),
                ChangeRecord::create("c", ObjectType::Table),
            ],
        );
        let unsent = ledger.list_unsent(2).unwrap();
        assert_eq!(unsent.len(), 2);
        assert_eq!(unsent[0].record.object_id, "b");
        assert_eq!(unsent[1].record.object_id, "a");
    }

    #[test]
    fn list_changes_by_cursor_and_type() {
        let (tm, ledger) = setup();
        commit_records(
            &tm,
            &ledger,
            vec![
                ChangeRecord::create("1", ObjectType::Entity),
                ChangeRecord::create("2", ObjectType::Table),
                ChangeRecord::create("3", ObjectType::Entity),
            ],
        );
        let all = ledger.list_changes(ChangeNumber::ZERO, None, 10).unwrap();
        assert_eq!(all.len(), 3);

        let after_first = ledger
            .list_changes(all[0].change_number.unwrap(), Some(ObjectType::Entity), 10)
            .unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].object_id, "3");
    }

    #[test]
    fn checksum_tracks_latest_change() {
        let (tm, a) = setup();
        commit_records(&tm, &a, vec![ChangeRecord::create("5", ObjectType::Entity)]);
        let before = a.checksum_for_range(ObjectType::Entity, 0, 10, "s").unwrap();
        assert_eq!(before.row_count, 1);

        commit_records(&tm, &a, vec![ChangeRecord::update("5", ObjectType::Entity)]);
        let after = a.checksum_for_range(ObjectType::Entity, 0, 10, "s").unwrap();
        assert_eq!(after.row_count, 1);
        assert_ne!(before.checksum, after.checksum);

        let outside = a.checksum_for_range(ObjectType::Entity, 6, 10, "s").unwrap();
        assert_eq!(outside.row_count, 0);
        assert!(a.checksum_for_range(ObjectType::Entity, 10, 6, "s").is_err());
    }
}
