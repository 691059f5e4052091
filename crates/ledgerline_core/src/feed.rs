//! Cursor reads and channel subscriptions over committed changes.
//!
//! Pull consumers remember the last change number they processed and pass
//! it back to [`ChangeFeed::poll`]. The ledger makes change numbers visible
//! in increasing order, so advancing that cursor never skips a commit that
//! lands later.
//!
//! Push consumers take a channel from [`ChangeFeed::subscribe`]. The feed is
//! registered as an observer and forwards every delivered change to the
//! subscriptions whose filter matches.
//!
//! ```rust,ignore
//! let feed = outbox.feed().unwrap();
//! let mut cursor = ChangeNumber::ZERO;
//! loop {
//!     let page = feed.poll(cursor, Some(ObjectType::Table), 100)?;
//!     if page.is_empty() {
//!         break;
//!     }
//!     index(&page.records);
//!     cursor = page.cursor;
//! }
//! ```

use crate::error::CoreResult;
use crate::ledger::ChangeLedger;
use crate::observer::{ChangeObserver, Delivery};
use ledgerline_protocol::{ChangeNumber, ChangeRecord, ObjectType};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::trace;

/// One page of a cursor read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    /// Live records after the requested cursor, by change number.
    pub records: Vec<ChangeRecord>,
    /// Cursor to pass to the next poll.
    pub cursor: ChangeNumber,
}

impl FeedPage {
    /// Returns true if the page holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct Subscription {
    object_type: Option<ObjectType>,
    sender: Sender<ChangeRecord>,
}

/// Pull and push access to the changes of one ledger.
pub struct ChangeFeed {
    ledger: Arc<dyn ChangeLedger>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ChangeFeed {
    /// Creates a feed reading from `ledger`.
    pub fn new(ledger: Arc<dyn ChangeLedger>) -> Self {
        Self {
            ledger,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Reads up to `limit` live changes numbered after `cursor`.
    ///
    /// The returned cursor is the number of the last record, or `cursor`
    /// itself when nothing new is visible.
    pub fn poll(
        &self,
        cursor: ChangeNumber,
        object_type: Option<ObjectType>,
        limit: usize,
    ) -> CoreResult<FeedPage> {
        let records = self.ledger.list_changes(cursor, object_type, limit)?;
        let next = records
            .last()
            .and_then(|r| r.change_number)
            .unwrap_or(cursor);
        trace!(from = %cursor, to = %next, records = records.len(), "polled feed");
        Ok(FeedPage {
            records,
            cursor: next,
        })
    }

    /// Subscribes to changes delivered from now on.
    ///
    /// With `Some(object_type)` only changes of that type are sent.
    pub fn subscribe(&self, object_type: Option<ObjectType>) -> Receiver<ChangeRecord> {
        let (sender, receiver) = mpsc::channel();
        self.subscriptions.lock().push(Subscription {
            object_type,
            sender,
        });
        receiver
    }

    /// Returns the number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl ChangeObserver for ChangeFeed {
    fn observe(&self, delivery: Delivery<'_>) -> CoreResult<()> {
        let Delivery::Change(record) = delivery else {
            return Ok(());
        };
        // A failed send means the receiver is gone.
        self.subscriptions.lock().retain(|s| {
            if s.object_type.map_or(true, |t| t == record.object_type) {
                s.sender.send(record.clone()).is_ok()
            } else {
                true
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscriptions", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
