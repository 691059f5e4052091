//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::ledger::ChangeLedger;
use crate::transaction::state::{ActiveSet, Outcome, Transaction};
use crate::transaction::TransactionSynchronization;
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Begins, commits and rolls back transactions.
///
/// Commit runs the registered hooks in order and persists the ledger
/// entries staged during the transaction between the before-commit and
/// after-commit phases. Nothing staged becomes visible unless commit gets
/// past the persist step.
pub struct TransactionManager {
    /// Ledger receiving staged entries.
    ledger: Arc<dyn ChangeLedger>,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Active transactions, shared with each transaction for drop cleanup.
    active_txns: ActiveSet,
}

impl TransactionManager {
    /// Creates a new transaction manager over a ledger.
    pub fn new(ledger: Arc<dyn ChangeLedger>) -> Self {
        Self {
            ledger,
            next_txid: AtomicU64::new(1),
            active_txns: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ChangeLedger> {
        &self.ledger
    }

    /// Begins a transaction without an actor.
    pub fn begin(&self) -> Transaction {
        self.begin_with(None)
    }

    /// Begins a transaction on behalf of a user.
    ///
    /// Changes registered without a user id are attributed to this user.
    pub fn begin_as(&self, user_id: u64) -> Transaction {
        self.begin_with(Some(user_id))
    }

    fn begin_with(&self, user_id: Option<u64>) -> Transaction {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.active_txns.write().push(txid);
        Transaction::tracked(txid, user_id, Arc::clone(&self.active_txns))
    }

    /// Commits a transaction.
    ///
    /// If a before-commit hook or the ledger fails, the transaction is
    /// rolled back, after-completion hooks see [`Outcome::RolledBack`] and
    /// the error is returned. Once committed, after-commit hook errors are
    /// logged and the first one is returned after every hook has run; the
    /// commit itself stands.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        txn.mark_committing();

        let syncs = txn.take_synchronizations();

        for sync in &syncs {
            if let Err(e) = sync.before_commit(txn) {
                return Err(self.roll_back_failed(txn, &syncs, e));
            }
        }

        if let Err(e) = self.ledger.persist_staged(txn) {
            return Err(self.roll_back_failed(txn, &syncs, e));
        }

        txn.mark_committed();
        self.release(txn.id());
        debug!(txn = %txn.id(), hooks = syncs.len(), "transaction committed");

        let mut first_error = None;
        for sync in &syncs {
            if let Err(e) = sync.after_commit(txn) {
                warn!(txn = %txn.id(), error = %e, "after-commit hook failed");
                first_error.get_or_insert(e);
            }
        }

        for sync in &syncs {
            sync.after_completion(txn, Outcome::Committed);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rolls back a transaction.
    ///
    /// Staged ledger entries are discarded and after-completion hooks see
    /// [`Outcome::RolledBack`].
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;

        txn.mark_rolled_back();
        self.release(txn.id());

        let syncs = txn.take_synchronizations();
        for sync in &syncs {
            sync.after_completion(txn, Outcome::RolledBack);
        }
        debug!(txn = %txn.id(), "transaction rolled back");

        Ok(())
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        self.run(self.begin(), f)
    }

    /// Runs `f` inside a transaction on behalf of a user.
    pub fn transaction_as<F, T>(&self, user_id: u64, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        self.run(self.begin_as(user_id), f)
    }

    fn run<F, T>(&self, mut txn: Transaction, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    self.abort(&mut txn)?;
                }
                Err(e)
            }
        }
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    fn roll_back_failed(
        &self,
        txn: &mut Transaction,
        syncs: &[Arc<dyn TransactionSynchronization>],
        error: CoreError,
    ) -> CoreError {
        warn!(txn = %txn.id(), error = %error, "commit failed, rolling back");
        txn.mark_rolled_back();
        self.release(txn.id());
        for sync in syncs {
            sync.after_completion(txn, Outcome::RolledBack);
        }
        error
    }

    fn release(&self, txid: TransactionId) {
        self.active_txns.write().retain(|&id| id != txid);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("current_change_number", &self.ledger.current_change_number())
            .finish_non_exhaustive()
    }
}
