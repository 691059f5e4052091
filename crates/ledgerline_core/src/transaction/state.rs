//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionSynchronization;
use crate::types::TransactionId;
use ledgerline_protocol::ChangeRecord;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Ids of the transactions a manager has begun and not yet completed.
pub(crate) type ActiveSet = Arc<RwLock<Vec<TransactionId>>>;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and accepts registrations.
    Active,
    /// Before-commit hooks are running.
    Committing,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// Final outcome passed to after-completion hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
}

/// A unit of work.
///
/// A transaction is an explicit context value: everything scoped to it
/// (the outbox buffer, staged ledger entries, registered hooks) lives here
/// and is dropped with it. Pass `&mut Transaction` to every call that
/// participates in the unit of work.
///
/// Dropping a transaction that is still active rolls it back: its staged
/// entries are discarded and after-completion hooks see
/// [`Outcome::RolledBack`].
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Actor performing the work.
    user_id: Option<u64>,
    /// Current state.
    state: TransactionState,
    /// Resources bound by type.
    resources: HashMap<TypeId, Box<dyn Any + Send>>,
    /// Commit hooks in registration order.
    synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
    /// Numbered ledger records waiting for commit.
    staged: Vec<ChangeRecord>,
    /// Records as the ledger made them visible, with their final numbers.
    persisted: Vec<ChangeRecord>,
    /// Active set of the manager that began this transaction.
    active: Option<ActiveSet>,
}

impl Transaction {
    /// Creates a new transaction.
    pub(crate) fn new(id: TransactionId, user_id: Option<u64>) -> Self {
        Self {
            id,
            user_id,
            state: TransactionState::Active,
            resources: HashMap::new(),
            synchronizations: Vec::new(),
            staged: Vec::new(),
            persisted: Vec::new(),
            active: None,
        }
    }

    pub(crate) fn tracked(id: TransactionId, user_id: Option<u64>, active: ActiveSet) -> Self {
        let mut txn = Self::new(id, user_id);
        txn.active = Some(active);
        txn
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the actor, if one was given at begin.
    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Checks if the transaction has not completed yet.
    ///
    /// True while active and while before-commit hooks run.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Active | TransactionState::Committing
        )
    }

    /// Binds a resource, replacing any previous resource of the same type.
    pub fn bind<T: Any + Send>(&mut self, resource: T) {
        self.resources.insert(TypeId::of::<T>(), Box::new(resource));
    }

    /// Returns the bound resource of type `T`.
    #[must_use]
    pub fn resource<T: Any + Send>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|r| r.downcast_ref::<T>())
    }

    /// Returns the bound resource of type `T` mutably.
    pub fn resource_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.resources
            .get_mut(&TypeId::of::<T>())
            .and_then(|r| r.downcast_mut::<T>())
    }

    /// Removes and returns the bound resource of type `T`.
    pub fn unbind<T: Any + Send>(&mut self) -> Option<T> {
        self.resources
            .remove(&TypeId::of::<T>())
            .and_then(|r| r.downcast::<T>().ok())
            .map(|r| *r)
    }

    /// Returns true if a resource of type `T` is bound.
    #[must_use]
    pub fn has_resource<T: Any + Send>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }

    /// Registers a commit hook.
    ///
    /// Hooks run in registration order. Registration is only allowed while
    /// the transaction is active.
    pub fn register_synchronization(
        &mut self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.synchronizations.push(synchronization);
        Ok(())
    }

    /// Returns the number of registered hooks.
    #[must_use]
    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.len()
    }

    /// Stages a numbered ledger record.
    ///
    /// Staged records become visible in the ledger only if the transaction
    /// commits.
    pub fn stage(&mut self, record: ChangeRecord) -> CoreResult<()> {
        if !self.is_in_progress() {
            return Err(CoreError::persistence(format!(
                "cannot stage change for {}: transaction is not in progress",
                self.id
            )));
        }
        self.staged.push(record);
        Ok(())
    }

    /// Returns the staged records.
    #[must_use]
    pub fn staged(&self) -> &[ChangeRecord] {
        &self.staged
    }

    /// Removes and returns all staged records.
    pub fn take_staged(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.staged)
    }

    /// Records the entries the ledger made visible at commit.
    ///
    /// A ledger may number a staged record again when persisting it; the
    /// records given here carry the numbers observers must see.
    pub fn set_persisted(&mut self, records: Vec<ChangeRecord>) {
        self.persisted = records;
    }

    /// Returns the entries made visible at commit.
    #[must_use]
    pub fn persisted(&self) -> &[ChangeRecord] {
        &self.persisted
    }

    pub(crate) fn take_synchronizations(&mut self) -> Vec<Arc<dyn TransactionSynchronization>> {
        std::mem::take(&mut self.synchronizations)
    }

    pub(crate) fn mark_committing(&mut self) {
        self.state = TransactionState::Committing;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
        self.staged.clear();
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committing => {
                Err(CoreError::illegal_state("transaction is committing"))
            }
            TransactionState::Committed => {
                Err(CoreError::illegal_state("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::illegal_state("transaction already rolled back"))
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state)
            .field("resources", &self.resources.len())
            .field("synchronizations", &self.synchronizations.len())
            .field("staged", &self.staged.len())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.is_in_progress() {
            return;
        }
        warn!(txn = %self.id, "transaction dropped without commit or abort, rolling back");
        self.mark_rolled_back();
        if let Some(active) = self.active.take() {
            active.write().retain(|&id| id != self.id);
        }
        let syncs = self.take_synchronizations();
        for sync in &syncs {
            sync.after_completion(self, Outcome::RolledBack);
        }
    }
}
