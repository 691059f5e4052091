//! Change observers.

use crate::error::CoreResult;
use ledgerline_protocol::{ChangeRecord, LocalStackMessage, ObjectKey};

/// A message handed to an observer after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<'a> {
    /// A committed, ledger-numbered change.
    Change(&'a ChangeRecord),
    /// A local notification.
    Local(&'a LocalStackMessage),
}

impl Delivery<'_> {
    /// Returns the key of the object the delivery refers to.
    pub fn key(&self) -> ObjectKey {
        match self {
            Delivery::Change(record) => record.key(),
            Delivery::Local(message) => {
                ObjectKey::new(message.object_id.clone(), message.object_type)
            }
        }
    }

    /// Returns the change record, if this is a change delivery.
    pub fn as_change(&self) -> Option<&ChangeRecord> {
        match *self {
            Delivery::Change(record) => Some(record),
            Delivery::Local(_) => None,
        }
    }
}

/// Receives committed changes and local notifications.
///
/// Observers run on the committing thread and should be fast, e.g. push
/// to a queue. Delivery is at-least-once across the push and recovery
/// paths, so observers must be idempotent on
/// `(object_id, object_type, change_number)`.
///
/// An error is logged and does not affect delivery to other observers.
pub trait ChangeObserver: Send + Sync {
    /// Handles one delivery.
    fn observe(&self, delivery: Delivery<'_>) -> CoreResult<()>;
}

impl<F> ChangeObserver for F
where
    F: Fn(Delivery<'_>) -> CoreResult<()> + Send + Sync,
{
    fn observe(&self, delivery: Delivery<'_>) -> CoreResult<()> {
        self(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_protocol::ObjectType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_observers() {
        let seen = AtomicUsize::new(0);
        let observer = |d: Delivery<'_>| {
            if d.as_change().is_some() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        };
        let record = ChangeRecord::create("1", ObjectType::Entity);
        let local = LocalStackMessage::new("1", ObjectType::Entity);
        observer.observe(Delivery::Change(&record)).unwrap();
        observer.observe(Delivery::Local(&local)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(Delivery::Local(&local).key(), record.key());
    }
}
