//! Units of work with commit hooks.
//!
//! A [`Transaction`] is an explicit context value threaded through every
//! call that takes part in it. The [`TransactionManager`] drives the
//! two-phase commit callbacks:
//!
//! 1. `before_commit` hooks, still inside the unit of work
//! 2. staged ledger entries are persisted
//! 3. `after_commit` hooks, once the work is durable
//! 4. `after_completion` hooks, on every outcome
//!
//! A failure in steps 1 or 2 rolls the transaction back.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Outcome, Transaction, TransactionState};

use crate::error::CoreResult;

/// Callbacks attached to one transaction.
///
/// Hooks receive the transaction so they can read and update the
/// resources bound to it.
pub trait TransactionSynchronization: Send + Sync {
    /// Runs before the transaction commits.
    ///
    /// An error rolls the transaction back.
    fn before_commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        let _ = txn;
        Ok(())
    }

    /// Runs after the transaction committed.
    ///
    /// Errors are reported to the committer but never undo the commit.
    fn after_commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        let _ = txn;
        Ok(())
    }

    /// Runs once the transaction completed, whatever the outcome.
    fn after_completion(&self, txn: &mut Transaction, outcome: Outcome) {
        let _ = (txn, outcome);
    }
}
