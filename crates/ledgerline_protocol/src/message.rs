//! Change records and local notifications.

use crate::error::{ProtocolError, ProtocolResult};
use crate::object::{ChangeNumber, ChangeType, ObjectType};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity of the object a change refers to.
///
/// Within one transaction at most one change exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Object identifier.
    pub object_id: String,
    /// Object kind.
    pub object_type: ObjectType,
}

impl ObjectKey {
    /// Creates a new key.
    pub fn new(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            object_id: object_id.into(),
            object_type,
        }
    }
}

/// A single change to an object.
///
/// Records are unnumbered while they sit in a transaction buffer and carry
/// a ledger-assigned `change_number` once the transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Object identifier.
    pub object_id: String,
    /// Object kind.
    pub object_type: ObjectType,
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Ledger-assigned number. `None` until committed.
    pub change_number: Option<ChangeNumber>,
    /// Actor who made the change.
    pub user_id: Option<u64>,
    /// Milliseconds since the epoch, set by the ledger.
    pub timestamp: Option<u64>,
}

impl ChangeRecord {
    /// Creates an unnumbered change record.
    pub fn new(
        object_id: impl Into<String>,
        object_type: ObjectType,
        change_type: ChangeType,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            object_type,
            change_type,
            change_number: None,
            user_id: None,
            timestamp: None,
        }
    }

    /// Creates a create record.
    pub fn create(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self::new(object_id, object_type, ChangeType::Create)
    }

    /// Creates an update record.
    pub fn update(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self::new(object_id, object_type, ChangeType::Update)
    }

    /// Creates a delete record.
    pub fn delete(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self::new(object_id, object_type, ChangeType::Delete)
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Returns the object key of this record.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_id.clone(), self.object_type)
    }

    /// Returns true once the ledger has numbered this record.
    pub fn is_numbered(&self) -> bool {
        self.change_number.is_some()
    }

    /// Validates the fields every record needs.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.object_id.is_empty() {
            return Err(ProtocolError::missing("objectId"));
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        crate::codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        crate::codec::decode(bytes)
    }
}

/// Change details carried by a local notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChange {
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Actor who made the change. Required.
    pub user_id: Option<u64>,
    /// Change number, if the notification mirrors a ledger entry.
    pub change_number: Option<ChangeNumber>,
}

/// A fire-and-forget notification that bypasses the ledger.
///
/// Used for object lifecycle events that do not need durable numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStackMessage {
    /// Object identifier.
    pub object_id: String,
    /// Object kind.
    pub object_type: ObjectType,
    /// Milliseconds since the epoch. Filled in on publish when absent.
    pub timestamp: Option<u64>,
    /// Optional change details.
    pub change: Option<LocalChange>,
}

impl LocalStackMessage {
    /// Creates a plain lifecycle notification.
    pub fn new(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            object_id: object_id.into(),
            object_type,
            timestamp: None,
            change: None,
        }
    }

    /// Attaches change details.
    #[must_use]
    pub fn with_change(mut self, change_type: ChangeType, user_id: Option<u64>) -> Self {
        self.change = Some(LocalChange {
            change_type,
            user_id,
            change_number: None,
        });
        self
    }

    /// Validates required fields.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.object_id.is_empty() {
            return Err(ProtocolError::missing("message.objectId"));
        }
        if let Some(change) = &self.change {
            if change.user_id.is_none() {
                return Err(ProtocolError::missing("message.userId"));
            }
        }
        Ok(())
    }
}

/// A message bound to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Message {
    /// A durable, ledger-numbered change.
    Change(ChangeRecord),
    /// A local notification.
    Local(LocalStackMessage),
}

impl Message {
    /// Returns the object key.
    pub fn key(&self) -> ObjectKey {
        match self {
            Message::Change(record) => record.key(),
            Message::Local(message) => {
                ObjectKey::new(message.object_id.clone(), message.object_type)
            }
        }
    }

    /// Returns a short name for the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Change(_) => "change",
            Message::Local(_) => "local",
        }
    }
}

impl From<ChangeRecord> for Message {
    fn from(record: ChangeRecord) -> Self {
        Message::Change(record)
    }
}

impl From<LocalStackMessage> for Message {
    fn from(message: LocalStackMessage) -> Self {
        Message::Local(message)
    }
}
