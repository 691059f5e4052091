//! # Ledgerline Core
//!
//! Transactional change propagation for Ledgerline.
//!
//! This crate provides:
//! - Explicit transactions with before/after-commit hooks
//! - The change ledger, numbering every committed change
//! - The transactional messenger (outbox), delivering changes to observers
//!   only after their transaction commits
//! - A change feed with cursor polling over the ledger and channel subscribers
//! - The materialized-view trigger reacting to table status events

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod feed;
mod ledger;
mod messenger;
mod observer;
mod outbox;
mod transaction;
mod trigger;
mod types;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use feed::{ChangeFeed, FeedPage};
pub use ledger::{ChangeLedger, InMemoryLedger, LedgerEntry};
pub use messenger::{OutboxState, TransactionalMessenger};
pub use observer::{ChangeObserver, Delivery};
pub use outbox::Outbox;
pub use transaction::{
    Outcome, Transaction, TransactionManager, TransactionState, TransactionSynchronization,
};
pub use trigger::{MaterializedViewTrigger, ViewRefresher};
pub use types::{ObserverId, TransactionId};
