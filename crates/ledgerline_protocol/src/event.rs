//! Table status events consumed by the materialized-view trigger.

use crate::object::ObjectType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableState {
    /// The table is built and queryable.
    Available,
    /// The table is being (re)built.
    Processing,
    /// The last build failed.
    ProcessingFailed,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableState::Available => write!(f, "AVAILABLE"),
            TableState::Processing => write!(f, "PROCESSING"),
            TableState::ProcessingFailed => write!(f, "PROCESSING_FAILED"),
        }
    }
}

/// A table changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatusEvent {
    /// Kind of object the event was published for.
    pub object_type: ObjectType,
    /// Table identifier.
    pub object_id: String,
    /// New state.
    pub state: TableState,
}

impl TableStatusEvent {
    /// Creates an event for a table.
    pub fn new(object_id: impl Into<String>, state: TableState) -> Self {
        Self {
            object_type: ObjectType::TableStatusEvent,
            object_id: object_id.into(),
            state,
        }
    }

    /// Returns true when the table became queryable.
    pub fn is_available(&self) -> bool {
        self.state == TableState::Available
    }
}
