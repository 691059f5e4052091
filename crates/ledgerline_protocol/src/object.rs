//! Object kinds, change kinds and change numbers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of object a change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    /// An entity in the entity hierarchy.
    Entity,
    /// A provenance activity.
    Activity,
    /// A table's row data.
    Table,
    /// A table status transition.
    TableStatusEvent,
    /// A materialized view definition.
    MaterializedView,
    /// A user or team.
    Principal,
    /// An access control list.
    AccessControlList,
    /// A file handle.
    FileHandle,
    /// An evaluation queue.
    Evaluation,
    /// A submission to an evaluation.
    Submission,
}

impl ObjectType {
    /// All object types in declaration order.
    pub const ALL: [ObjectType; 10] = [
        ObjectType::Entity,
        ObjectType::Activity,
        ObjectType::Table,
        ObjectType::TableStatusEvent,
        ObjectType::MaterializedView,
        ObjectType::Principal,
        ObjectType::AccessControlList,
        ObjectType::FileHandle,
        ObjectType::Evaluation,
        ObjectType::Submission,
    ];

    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Entity => "ENTITY",
            ObjectType::Activity => "ACTIVITY",
            ObjectType::Table => "TABLE",
            ObjectType::TableStatusEvent => "TABLE_STATUS_EVENT",
            ObjectType::MaterializedView => "MATERIALIZED_VIEW",
            ObjectType::Principal => "PRINCIPAL",
            ObjectType::AccessControlList => "ACCESS_CONTROL_LIST",
            ObjectType::FileHandle => "FILE_HANDLE",
            ObjectType::Evaluation => "EVALUATION",
            ObjectType::Submission => "SUBMISSION",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        ObjectType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::unknown("object type", s))
    }
}

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Object was created.
    Create,
    /// Object was updated.
    Update,
    /// Object was deleted.
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Create => write!(f, "CREATE"),
            ChangeType::Update => write!(f, "UPDATE"),
            ChangeType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Ledger-assigned change number.
///
/// Change numbers are monotonic per store and never reused. They give
/// incremental consumers a total order across transactions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChangeNumber(pub u64);

impl ChangeNumber {
    /// The position before any change was numbered.
    pub const ZERO: ChangeNumber = ChangeNumber(0);

    /// Creates a new change number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next change number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change:{}", self.0)
    }
}
