//! The outbox facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::feed::ChangeFeed;
use crate::ledger::{ChangeLedger, InMemoryLedger};
use crate::messenger::TransactionalMessenger;
use crate::observer::ChangeObserver;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::ObserverId;
use ledgerline_protocol::{ChangeRecord, ObjectType};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;

/// A ledger, transaction manager and messenger wired together.
///
/// # Example
///
/// ```rust,ignore
/// use ledgerline_core::Outbox;
/// use ledgerline_protocol::{ChangeType, ObjectType};
///
/// let outbox = Outbox::in_memory();
/// outbox.transaction(|txn| {
///     outbox.messenger().send_change(txn, "42", ObjectType::Entity, ChangeType::Update)
/// })?;
/// ```
pub struct Outbox {
    config: Config,
    ledger: Arc<dyn ChangeLedger>,
    manager: TransactionManager,
    messenger: TransactionalMessenger,
    feed: Option<Arc<ChangeFeed>>,
}

impl Outbox {
    /// Opens an outbox over a fresh in-memory ledger with default config.
    pub fn in_memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens an outbox over a fresh in-memory ledger.
    pub fn with_config(config: Config) -> Self {
        Self::with_ledger(Arc::new(InMemoryLedger::new()), config)
    }

    /// Opens an outbox over the given ledger.
    pub fn with_ledger(ledger: Arc<dyn ChangeLedger>, config: Config) -> Self {
        let manager = TransactionManager::new(Arc::clone(&ledger));
        let messenger = TransactionalMessenger::new(Arc::clone(&ledger));

        let feed = config.enable_feed.then(|| {
            let feed = Arc::new(ChangeFeed::new(Arc::clone(&ledger)));
            messenger.register_observer(feed.clone());
            feed
        });
        debug!(feed = feed.is_some(), "outbox opened");

        Self {
            config,
            ledger,
            manager,
            messenger,
            feed,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ChangeLedger> {
        &self.ledger
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Returns the messenger.
    #[must_use]
    pub fn messenger(&self) -> &TransactionalMessenger {
        &self.messenger
    }

    /// Returns the change feed, if enabled.
    #[must_use]
    pub fn feed(&self) -> Option<&Arc<ChangeFeed>> {
        self.feed.as_ref()
    }

    /// Begins a transaction.
    pub fn begin(&self) -> Transaction {
        self.manager.begin()
    }

    /// Runs `f` inside a transaction, committing on `Ok`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        self.manager.transaction(f)
    }

    /// Adds an observer.
    pub fn register_observer(&self, observer: Arc<dyn ChangeObserver>) -> ObserverId {
        self.messenger.register_observer(observer)
    }

    /// Subscribes to committed changes, optionally of one type only.
    pub fn subscribe(
        &self,
        object_type: Option<ObjectType>,
    ) -> CoreResult<Receiver<ChangeRecord>> {
        self.feed
            .as_ref()
            .map(|f| f.subscribe(object_type))
            .ok_or_else(|| CoreError::illegal_state("change feed is disabled"))
    }

    /// Publishes one page of unsent changes to `sink`.
    ///
    /// The page size comes from [`Config::unsent_page_size`].
    pub fn publish_unsent(&self, sink: &dyn ChangeObserver) -> CoreResult<usize> {
        self.messenger
            .publish_unsent(sink, self.config.unsent_page_size)
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("messenger", &self.messenger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Delivery;
    use ledgerline_protocol::{ChangeNumber, ChangeType};
    use std::time::Duration;

    #[test]
    fn committed_changes_reach_the_feed() {
        let outbox = Outbox::in_memory();
        let rx = outbox.subscribe(None).unwrap();

        outbox
            .transaction(|txn| {
                outbox
                    .messenger()
                    .send_change(txn, "42", ObjectType::Entity, ChangeType::Update)
            })
            .unwrap();

        let record = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(record.object_id, "42");
        assert!(record.is_numbered());

        let page = outbox
            .feed()
            .unwrap()
            .poll(ChangeNumber::ZERO, None, 10)
            .unwrap();
        assert_eq!(page.records, vec![record]);
    }

    #[test]
    fn disabled_feed() {
        let outbox = Outbox::with_config(Config::new().enable_feed(false));
        assert!(outbox.subscribe(None).is_err());
        assert!(outbox.feed().is_none());
        assert_eq!(outbox.messenger().observer_count(), 0);
    }

    #[test]
    fn publish_unsent_uses_page_size() {
        let outbox = Outbox::with_config(Config::new().unsent_page_size(2));
        outbox
            .transaction(|txn| {
                for id in ["1", "2", "3"] {
                    outbox
                        .messenger()
                        .send_change(txn, id, ObjectType::Entity, ChangeType::Create)?;
                }
                Ok(())
            })
            .unwrap();

        let accept_all = |_: Delivery<'_>| -> CoreResult<()> { Ok(()) };
        assert_eq!(outbox.publish_unsent(&accept_all).unwrap(), 2);
        assert_eq!(outbox.publish_unsent(&accept_all).unwrap(), 1);
        assert_eq!(outbox.publish_unsent(&accept_all).unwrap(), 0);
    }
}
