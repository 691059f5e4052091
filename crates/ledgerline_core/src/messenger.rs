//! The transactional messenger.
//!
//! The messenger is an outbox: changes registered inside a transaction are
//! buffered in that transaction, numbered by the ledger just before it
//! commits and handed to observers only after it committed. A rolled back
//! transaction drops its buffer without any observer seeing it.
//!
//! ```text
//! NoTransaction → Accumulating → Committing → Delivered
//!                              ↘ Discarded
//! ```
//!
//! Within one transaction the buffer holds at most one change per object
//! key; a later registration replaces the earlier one in place. Local
//! messages are all kept and delivered in publish order. Each messenger
//! keeps its own buffer, so two messengers can share a transaction.

use crate::error::{CoreError, CoreResult};
use crate::ledger::ChangeLedger;
use crate::observer::{ChangeObserver, Delivery};
use crate::transaction::{Outcome, Transaction, TransactionState, TransactionSynchronization};
use crate::types::ObserverId;
use ledgerline_protocol::{
    now_millis, ChangeNumber, ChangeRecord, ChangeType, LocalStackMessage, Message, ObjectKey,
    ObjectType,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outbox state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// No transaction; publishing delivers immediately.
    NoTransaction,
    /// Messages are being buffered.
    Accumulating,
    /// Buffered changes are being numbered.
    Committing,
    /// The transaction committed and its messages were delivered.
    Delivered,
    /// The transaction rolled back and its messages were dropped.
    Discarded,
}

static NEXT_MESSENGER: AtomicU64 = AtomicU64::new(1);

/// Messages one messenger buffered in one transaction.
#[derive(Debug, Default)]
struct OutboxBuffer {
    /// Messages in registration order.
    messages: Vec<Message>,
    /// Slot in `messages` of the change buffered for each object.
    changes: HashMap<ObjectKey, usize>,
}

impl OutboxBuffer {
    fn register_change(&mut self, record: ChangeRecord) {
        let key = record.key();
        match self.changes.get(&key) {
            Some(&slot) => self.messages[slot] = Message::Change(record),
            None => {
                self.changes.insert(key, self.messages.len());
                self.messages.push(Message::Change(record));
            }
        }
    }

    fn push_local(&mut self, message: LocalStackMessage) {
        self.messages.push(Message::Local(message));
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Transaction resource holding the buffer of every messenger that took
/// part in the transaction.
#[derive(Debug, Default)]
struct OutboxBuffers {
    by_messenger: HashMap<u64, OutboxBuffer>,
}

type ObserverList = Vec<(ObserverId, Arc<dyn ChangeObserver>)>;

struct MessengerInner {
    id: u64,
    ledger: Arc<dyn ChangeLedger>,
    observers: RwLock<ObserverList>,
    next_observer: AtomicU64,
}

impl MessengerInner {
    fn has_buffer(&self, txn: &Transaction) -> bool {
        txn.resource::<OutboxBuffers>()
            .map_or(false, |b| b.by_messenger.contains_key(&self.id))
    }

    fn take_buffer(&self, txn: &mut Transaction) -> Option<OutboxBuffer> {
        txn.resource_mut::<OutboxBuffers>()?
            .by_messenger
            .remove(&self.id)
    }

    fn put_buffer(&self, txn: &mut Transaction, buffer: OutboxBuffer) {
        if !txn.has_resource::<OutboxBuffers>() {
            txn.bind(OutboxBuffers::default());
        }
        if let Some(buffers) = txn.resource_mut::<OutboxBuffers>() {
            buffers.by_messenger.insert(self.id, buffer);
        }
    }

    /// Delivers one message to every observer, isolating failures.
    fn fan_out(&self, observers: &ObserverList, delivery: Delivery<'_>) {
        for (id, observer) in observers {
            if let Err(e) = observer.observe(delivery) {
                warn!(
                    observer = %id,
                    object = ?delivery.key(),
                    error = %e,
                    "observer failed, continuing delivery"
                );
            }
        }
    }
}

/// Buffers changes per transaction and delivers them after commit.
///
/// Cloning is cheap; clones share the ledger and the observer list.
#[derive(Clone)]
pub struct TransactionalMessenger {
    inner: Arc<MessengerInner>,
}

impl TransactionalMessenger {
    /// Creates a messenger that numbers changes through `ledger`.
    pub fn new(ledger: Arc<dyn ChangeLedger>) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                id: NEXT_MESSENGER.fetch_add(1, Ordering::Relaxed),
                ledger,
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a change to be recorded and delivered when `txn` commits.
    ///
    /// Fails with [`CoreError::IllegalState`] unless the transaction is
    /// active. A missing user id is taken from the transaction's actor.
    /// Registering another change for the same object replaces the
    /// previous one.
    pub fn send_message_after_commit(
        &self,
        txn: &mut Transaction,
        mut record: ChangeRecord,
    ) -> CoreResult<()> {
        txn.ensure_active()?;
        record.validate()?;
        if record.user_id.is_none() {
            record.user_id = txn.user_id();
        }
        record.change_number = None;
        record.timestamp = None;

        self.buffer(txn)?.register_change(record);
        Ok(())
    }

    /// Registers a change built from its parts.
    pub fn send_change(
        &self,
        txn: &mut Transaction,
        object_id: impl Into<String>,
        object_type: ObjectType,
        change_type: ChangeType,
    ) -> CoreResult<()> {
        self.send_message_after_commit(txn, ChangeRecord::new(object_id, object_type, change_type))
    }

    /// Registers a delete.
    pub fn send_delete_after_commit(
        &self,
        txn: &mut Transaction,
        object_id: impl Into<String>,
        object_type: ObjectType,
    ) -> CoreResult<()> {
        self.send_change(txn, object_id, object_type, ChangeType::Delete)
    }

    /// Publishes a local notification.
    ///
    /// Inside an active transaction the message is held until commit and
    /// dropped on rollback. Without a transaction it is delivered
    /// immediately. The timestamp defaults to now and a missing change
    /// user id is taken from the transaction's actor.
    pub fn publish_after_commit(
        &self,
        txn: Option<&mut Transaction>,
        mut message: LocalStackMessage,
    ) -> CoreResult<()> {
        if message.timestamp.is_none() {
            message.timestamp = Some(now_millis());
        }
        if let (Some(change), Some(txn)) = (message.change.as_mut(), txn.as_deref()) {
            if change.user_id.is_none() {
                change.user_id = txn.user_id();
            }
        }
        message.validate()?;

        match txn {
            Some(txn) => {
                txn.ensure_active()?;
                self.buffer(txn)?.push_local(message);
            }
            None => {
                let observers = self.inner.observers.read().clone();
                self.inner.fan_out(&observers, Delivery::Local(&message));
            }
        }
        Ok(())
    }

    /// Returns the outbox state of a transaction.
    pub fn state(&self, txn: Option<&Transaction>) -> OutboxState {
        match txn.map(Transaction::state) {
            None => OutboxState::NoTransaction,
            Some(TransactionState::Active) => OutboxState::Accumulating,
            Some(TransactionState::Committing) => OutboxState::Committing,
            Some(TransactionState::Committed) => OutboxState::Delivered,
            Some(TransactionState::RolledBack) => OutboxState::Discarded,
        }
    }

    /// Returns the number of messages buffered in a transaction.
    pub fn pending_count(&self, txn: &Transaction) -> usize {
        txn.resource::<OutboxBuffers>()
            .and_then(|b| b.by_messenger.get(&self.inner.id))
            .map_or(0, OutboxBuffer::len)
    }

    /// Adds an observer. Observers are called in registration order.
    pub fn register_observer(&self, observer: Arc<dyn ChangeObserver>) -> ObserverId {
        let id = ObserverId::new(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        self.inner.observers.write().push((id, observer));
        id
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Lists committed changes not yet published, oldest first.
    pub fn list_unsent_messages(&self, limit: usize) -> CoreResult<Vec<ChangeRecord>> {
        Ok(self
            .inner
            .ledger
            .list_unsent(limit)?
            .into_iter()
            .map(|e| e.record)
            .collect())
    }

    /// Marks a page of changes of one type as published.
    pub fn register_messages_sent(
        &self,
        object_type: ObjectType,
        page: &[ChangeRecord],
    ) -> CoreResult<usize> {
        self.inner.ledger.mark_sent(object_type, page)
    }

    /// Publishes up to `limit` unsent changes to `sink` and marks the ones
    /// it accepted as sent.
    ///
    /// This is the recovery path for external publishers. Changes the sink
    /// rejects stay unsent and are offered again on the next call.
    pub fn publish_unsent(&self, sink: &dyn ChangeObserver, limit: usize) -> CoreResult<usize> {
        let mut accepted: HashMap<ObjectType, Vec<ChangeRecord>> = HashMap::new();
        for record in self.list_unsent_messages(limit)? {
            match sink.observe(Delivery::Change(&record)) {
                Ok(()) => accepted.entry(record.object_type).or_default().push(record),
                Err(e) => warn!(
                    change = ?record.change_number,
                    error = %e,
                    "sink rejected change, leaving it unsent"
                ),
            }
        }

        let mut marked = 0;
        for (object_type, page) in accepted {
            marked += self.register_messages_sent(object_type, &page)?;
        }
        Ok(marked)
    }

    /// Returns this messenger's buffer in the transaction, binding it and
    /// registering the commit hooks on first use.
    fn buffer<'t>(&self, txn: &'t mut Transaction) -> CoreResult<&'t mut OutboxBuffer> {
        if !self.inner.has_buffer(txn) {
            txn.register_synchronization(Arc::new(OutboxSynchronization {
                inner: Arc::clone(&self.inner),
            }))?;
            self.inner.put_buffer(txn, OutboxBuffer::default());
        }
        txn.resource_mut::<OutboxBuffers>()
            .and_then(|b| b.by_messenger.get_mut(&self.inner.id))
            .ok_or_else(|| CoreError::illegal_state("outbox buffer is not bound"))
    }
}

impl std::fmt::Debug for TransactionalMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalMessenger")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

/// Commit hooks of one transaction's outbox.
struct OutboxSynchronization {
    inner: Arc<MessengerInner>,
}

impl TransactionSynchronization for OutboxSynchronization {
    fn before_commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        let Some(mut buffer) = self.inner.take_buffer(txn) else {
            return Ok(());
        };

        let mut result = Ok(());
        for message in &mut buffer.messages {
            if let Message::Change(record) = message {
                match self.inner.ledger.append(txn, record.clone()) {
                    Ok(numbered) => *record = numbered,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        self.inner.put_buffer(txn, buffer);
        result
    }

    fn after_commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        let Some(mut buffer) = self.inner.take_buffer(txn) else {
            return Ok(());
        };

        // The ledger may renumber a change committed after a newer one.
        let persisted: HashMap<ObjectKey, ChangeNumber> = txn
            .persisted()
            .iter()
            .filter_map(|r| r.change_number.map(|n| (r.key(), n)))
            .collect();
        for message in &mut buffer.messages {
            if let Message::Change(record) = message {
                if let Some(&number) = persisted.get(&record.key()) {
                    record.change_number = Some(number);
                }
            }
        }

        let mut deliveries = Vec::with_capacity(buffer.len());
        let mut unknown = None;
        for message in &buffer.messages {
            match message {
                Message::Change(record) if record.is_numbered() => {
                    deliveries.push(Delivery::Change(record));
                }
                Message::Change(record) => {
                    error!(
                        txn = %txn.id(),
                        object = ?record.key(),
                        "buffered change reached delivery without a change number"
                    );
                    unknown.get_or_insert_with(|| {
                        CoreError::unknown_message_kind("unnumbered change")
                    });
                }
                Message::Local(local) => deliveries.push(Delivery::Local(local)),
            }
        }

        let observers = self.inner.observers.read().clone();
        for (id, observer) in &observers {
            for delivery in &deliveries {
                if let Err(e) = observer.observe(*delivery) {
                    warn!(
                        observer = %id,
                        object = ?delivery.key(),
                        error = %e,
                        "observer failed, continuing delivery"
                    );
                }
            }
        }
        debug!(
            txn = %txn.id(),
            messages = deliveries.len(),
            observers = observers.len(),
            "delivered outbox"
        );

        match unknown {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn after_completion(&self, txn: &mut Transaction, outcome: Outcome) {
        if let Some(buffer) = self.inner.take_buffer(txn) {
            if outcome == Outcome::RolledBack {
                debug!(txn = %txn.id(), dropped = buffer.len(), "discarded outbox");
            }
        }
        if txn
            .resource::<OutboxBuffers>()
            .map_or(false, |b| b.by_messenger.is_empty())
        {
            txn.unbind::<OutboxBuffers>();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::transaction::TransactionManager;
    use ledgerline_protocol::ChangeNumber;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<String>>,
    }

    impl ChangeObserver for Collect {
        fn observe(&self, delivery: Delivery<'_>) -> CoreResult<()> {
            let line = match delivery {
                Delivery::Change(r) => format!(
                    "change {} {} {}",
                    r.object_id,
                    r.change_type,
                    r.change_number.map_or(0, |n| n.as_u64())
                ),
                Delivery::Local(m) => format!("local {}", m.object_id),
            };
            self.seen.lock().push(line);
            Ok(())
        }
    }

    fn setup() -> (TransactionManager, TransactionalMessenger, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let tm = TransactionManager::new(ledger.clone());
        let messenger = TransactionalMessenger::new(ledger.clone());
        (tm, messenger, ledger)
    }

    #[test]
    fn register_requires_active_transaction() {
        let (tm, messenger, _) = setup();
        let mut txn = tm.begin();
        tm.commit(&mut txn).unwrap();
        let err = messenger
            .send_change(&mut txn, "1", ObjectType::Entity, ChangeType::Create)
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalState { .. }));
    }

    #[test]
    fn last_registration_wins() {
        let (tm, messenger, _) = setup();
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        let mut txn = tm.begin();
        messenger
            .send_change(&mut txn, "42", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        messenger
            .send_change(&mut txn, "42", ObjectType::Entity, ChangeType::Update)
            .unwrap();
        assert_eq!(messenger.pending_count(&txn), 1);
        assert_eq!(txn.synchronization_count(), 1);
        tm.commit(&mut txn).unwrap();

        assert_eq!(*observer.seen.lock(), vec!["change 42 UPDATE 1"]);
    }

    #[test]
    fn rollback_delivers_nothing() {
        let (tm, messenger, ledger) = setup();
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        let mut txn = tm.begin();
        messenger
            .send_delete_after_commit(&mut txn, "7", ObjectType::Table)
            .unwrap();
        messenger
            .publish_after_commit(Some(&mut txn), LocalStackMessage::new("7", ObjectType::Table))
            .unwrap();
        tm.abort(&mut txn).unwrap();

        assert!(observer.seen.lock().is_empty());
        assert!(ledger.is_empty());
        assert_eq!(messenger.state(Some(&txn)), OutboxState::Discarded);
        assert_eq!(messenger.pending_count(&txn), 0);
    }

    #[test]
    fn actor_fills_missing_user() {
        let (tm, messenger, ledger) = setup();
        let mut txn = tm.begin_as(99);
        messenger
            .send_change(&mut txn, "1", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        messenger
            .send_message_after_commit(
                &mut txn,
                ChangeRecord::create("2", ObjectType::Entity).with_user(5),
            )
            .unwrap();
        tm.commit(&mut txn).unwrap();

        let changes = ledger.list_changes(ChangeNumber::ZERO, None, 10).unwrap();
        let users: Vec<_> = changes.iter().map(|r| r.user_id).collect();
        assert!(users.contains(&Some(99)));
        assert!(users.contains(&Some(5)));
    }

    #[test]
    fn publish_without_transaction_is_immediate() {
        let (_, messenger, _) = setup();
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        messenger
            .publish_after_commit(None, LocalStackMessage::new("3", ObjectType::Activity))
            .unwrap();
        assert_eq!(*observer.seen.lock(), vec!["local 3"]);
        assert_eq!(messenger.state(None), OutboxState::NoTransaction);
    }

    #[test]
    fn publish_validates_message() {
        let (tm, messenger, _) = setup();
        let err = messenger
            .publish_after_commit(None, LocalStackMessage::new("", ObjectType::Entity))
            .unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));

        let no_user = LocalStackMessage::new("1", ObjectType::Entity)
            .with_change(ChangeType::Update, None);
        assert!(messenger.publish_after_commit(None, no_user.clone()).is_err());

        let mut txn = tm.begin_as(3);
        messenger
            .publish_after_commit(Some(&mut txn), no_user)
            .unwrap();
        assert_eq!(messenger.pending_count(&txn), 1);
    }

    #[test]
    fn failing_observer_is_isolated() {
        let (tm, messenger, _) = setup();
        messenger.register_observer(Arc::new(|_: Delivery<'_>| -> CoreResult<()> {
            Err(CoreError::observer("down"))
        }));
        let healthy = Arc::new(Collect::default());
        messenger.register_observer(healthy.clone());

        let mut txn = tm.begin();
        messenger
            .send_change(&mut txn, "1", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        tm.commit(&mut txn).unwrap();

        assert_eq!(healthy.seen.lock().len(), 1);
        assert_eq!(messenger.state(Some(&txn)), OutboxState::Delivered);
    }

    #[test]
    fn observers_can_be_removed() {
        let (_, messenger, _) = setup();
        let id = messenger.register_observer(Arc::new(Collect::default()));
        assert_eq!(messenger.observer_count(), 1);
        assert!(messenger.remove_observer(id));
        assert!(!messenger.remove_observer(id));
        assert_eq!(messenger.observer_count(), 0);
    }

    #[test]
    fn unnumbered_change_at_delivery_is_raised() {
        let (tm, messenger, _) = setup();
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        let mut txn = tm.begin();
        messenger
            .publish_after_commit(Some(&mut txn), LocalStackMessage::new("1", ObjectType::Entity))
            .unwrap();
        txn.mark_committed();

        let mut buffer = OutboxBuffer::default();
        buffer.register_change(ChangeRecord::create("2", ObjectType::Entity));
        buffer.push_local(LocalStackMessage::new("1", ObjectType::Entity));
        messenger.inner.put_buffer(&mut txn, buffer);

        let sync = OutboxSynchronization {
            inner: Arc::clone(&messenger.inner),
        };
        let err = sync.after_commit(&mut txn).unwrap_err();

        assert!(matches!(err, CoreError::UnknownMessageKind { .. }));
        assert_eq!(*observer.seen.lock(), vec!["local 1"]);
    }

    #[test]
    fn every_local_message_is_delivered_in_order() {
        let (tm, messenger, _) = setup();
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        let mut txn = tm.begin_as(1);
        for change_type in [ChangeType::Create, ChangeType::Delete] {
            let message = LocalStackMessage::new("9", ObjectType::Table)
                .with_change(change_type, None);
            messenger.publish_after_commit(Some(&mut txn), message).unwrap();
        }
        messenger
            .send_change(&mut txn, "9", ObjectType::Table, ChangeType::Delete)
            .unwrap();
        assert_eq!(messenger.pending_count(&txn), 3);
        tm.commit(&mut txn).unwrap();

        assert_eq!(
            *observer.seen.lock(),
            vec!["local 9", "local 9", "change 9 DELETE 1"]
        );
    }

    #[test]
    fn messengers_sharing_a_transaction_keep_separate_buffers() {
        let (tm, first, ledger) = setup();
        let second = TransactionalMessenger::new(ledger.clone());
        let first_seen = Arc::new(Collect::default());
        let second_seen = Arc::new(Collect::default());
        first.register_observer(first_seen.clone());
        second.register_observer(second_seen.clone());

        let mut txn = tm.begin();
        first
            .send_change(&mut txn, "1", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        second
            .send_change(&mut txn, "2", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        assert_eq!(first.pending_count(&txn), 1);
        assert_eq!(second.pending_count(&txn), 1);
        assert_eq!(txn.synchronization_count(), 2);
        tm.commit(&mut txn).unwrap();

        assert_eq!(*first_seen.seen.lock(), vec!["change 1 CREATE 1"]);
        assert_eq!(*second_seen.seen.lock(), vec!["change 2 CREATE 2"]);
        assert_eq!(ledger.len(), 2);
        assert!(!txn.has_resource::<OutboxBuffers>());
    }

    /// Commits another transaction from inside the first one's commit.
    struct CommitOther {
        tm: Arc<TransactionManager>,
        other: Mutex<Option<Transaction>>,
    }

    impl TransactionSynchronization for CommitOther {
        fn before_commit(&self, _txn: &mut Transaction) -> CoreResult<()> {
            if let Some(mut other) = self.other.lock().take() {
                self.tm.commit(&mut other)?;
            }
            Ok(())
        }
    }

    #[test]
    fn overtaken_commit_is_delivered_with_its_final_number() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tm = Arc::new(TransactionManager::new(ledger.clone()));
        let messenger = TransactionalMessenger::new(ledger.clone());
        let observer = Arc::new(Collect::default());
        messenger.register_observer(observer.clone());

        let mut late = tm.begin();
        let mut early = tm.begin();
        messenger
            .send_change(&mut late, "1", ObjectType::Entity, ChangeType::Update)
            .unwrap();
        messenger
            .send_change(&mut early, "1", ObjectType::Entity, ChangeType::Delete)
            .unwrap();
        late.register_synchronization(Arc::new(CommitOther {
            tm: Arc::clone(&tm),
            other: Mutex::new(Some(early)),
        }))
        .unwrap();
        tm.commit(&mut late).unwrap();

        assert_eq!(
            *observer.seen.lock(),
            vec!["change 1 DELETE 2", "change 1 UPDATE 3"]
        );
        let live = ledger.list_changes(ChangeNumber::ZERO, None, 10).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].change_type, ChangeType::Update);
        assert_eq!(live[0].change_number, Some(ChangeNumber(3)));
    }

    #[test]
    fn publish_unsent_marks_accepted_changes() {
        let (tm, messenger, _) = setup();
        let mut txn = tm.begin();
        messenger
            .send_change(&mut txn, "1", ObjectType::Entity, ChangeType::Create)
            .unwrap();
        messenger
            .send_change(&mut txn, "2", ObjectType::Table, ChangeType::Create)
            .unwrap();
        tm.commit(&mut txn).unwrap();

        let reject_tables = |d: Delivery<'_>| -> CoreResult<()> {
            match d.as_change() {
                Some(r) if r.object_type == ObjectType::Table => Err(CoreError::observer("no")),
                _ => Ok(()),
            }
        };
        assert_eq!(messenger.publish_unsent(&reject_tables, 10).unwrap(), 1);
        let unsent = messenger.list_unsent_messages(10).unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].object_type, ObjectType::Table);
    }
}
