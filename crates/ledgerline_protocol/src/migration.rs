//! Migration record kinds and row fingerprints.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of record eligible for migration.
///
/// Declaration order is the default migration order: every dependent type
/// follows the primary type it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationType {
    /// Users and teams.
    Principal,
    /// Aliases of a principal.
    PrincipalAlias,
    /// Access control lists.
    AccessControlList,
    /// Resource access rows of an access control list.
    AclResourceAccess,
    /// Entity nodes.
    Node,
    /// Revisions of a node.
    NodeRevision,
    /// Provenance activities.
    Activity,
    /// File handles.
    FileHandle,
    /// Tables.
    Table,
    /// Row change sets of a table.
    TableRowChange,
    /// Ledger change records.
    Change,
    /// Delivery receipts of ledger change records.
    SentMessage,
}

impl MigrationType {
    /// All migration types in declaration order.
    pub const ALL: [MigrationType; 12] = [
        MigrationType::Principal,
        MigrationType::PrincipalAlias,
        MigrationType::AccessControlList,
        MigrationType::AclResourceAccess,
        MigrationType::Node,
        MigrationType::NodeRevision,
        MigrationType::Activity,
        MigrationType::FileHandle,
        MigrationType::Table,
        MigrationType::TableRowChange,
        MigrationType::Change,
        MigrationType::SentMessage,
    ];

    /// Returns the primary type this type depends on, if any.
    pub fn default_primary(&self) -> Option<MigrationType> {
        match self {
            MigrationType::PrincipalAlias => Some(MigrationType::Principal),
            MigrationType::AclResourceAccess => Some(MigrationType::AccessControlList),
            MigrationType::NodeRevision => Some(MigrationType::Node),
            MigrationType::TableRowChange => Some(MigrationType::Table),
            MigrationType::SentMessage => Some(MigrationType::Change),
            _ => None,
        }
    }

    /// Returns true if this type can be migrated independently.
    pub fn is_primary(&self) -> bool {
        self.default_primary().is_none()
    }

    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Principal => "PRINCIPAL",
            MigrationType::PrincipalAlias => "PRINCIPAL_ALIAS",
            MigrationType::AccessControlList => "ACCESS_CONTROL_LIST",
            MigrationType::AclResourceAccess => "ACL_RESOURCE_ACCESS",
            MigrationType::Node => "NODE",
            MigrationType::NodeRevision => "NODE_REVISION",
            MigrationType::Activity => "ACTIVITY",
            MigrationType::FileHandle => "FILE_HANDLE",
            MigrationType::Table => "TABLE",
            MigrationType::TableRowChange => "TABLE_ROW_CHANGE",
            MigrationType::Change => "CHANGE",
            MigrationType::SentMessage => "SENT_MESSAGE",
        }
    }
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        MigrationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::unknown("migration type", s))
    }
}

/// The comparable fingerprint of a row: its id and version tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowMetadata {
    /// Row id. Metadata streams are ascending by id.
    pub id: u64,
    /// Version tag. Changes whenever the row changes.
    pub etag: String,
}

impl RowMetadata {
    /// Creates a new fingerprint.
    pub fn new(id: u64, etag: impl Into<String>) -> Self {
        Self {
            id,
            etag: etag.into(),
        }
    }
}

/// A full row as transferred between stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row id.
    pub id: u64,
    /// Version tag.
    pub etag: String,
    /// Opaque row body.
    pub payload: Vec<u8>,
}

impl Row {
    /// Creates a new row.
    pub fn new(id: u64, etag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            etag: etag.into(),
            payload,
        }
    }

    /// Returns the row's fingerprint.
    pub fn metadata(&self) -> RowMetadata {
        RowMetadata::new(self.id, self.etag.clone())
    }
}

/// Outcome of migrating one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeStatus {
    /// Applied and confirmed by checksum.
    Verified,
    /// Migration stopped with an error.
    Failed,
    /// Not attempted because its primary failed.
    Skipped,
}

/// Per-type entry of a migration report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReport {
    /// The migrated type.
    #[serde(rename = "type")]
    pub migration_type: MigrationType,
    /// Outcome.
    pub status: TypeStatus,
    /// Rows inserted into the destination.
    pub inserted: u64,
    /// Rows updated in the destination.
    pub updated: u64,
    /// Rows deleted from the destination.
    pub deleted: u64,
    /// Number of checksum verifications run.
    pub verify_attempts: u32,
    /// Failure description, if any.
    pub error: Option<String>,
}

impl TypeReport {
    /// Creates an empty report for a type.
    pub fn new(migration_type: MigrationType, status: TypeStatus) -> Self {
        Self {
            migration_type,
            status,
            inserted: 0,
            updated: 0,
            deleted: 0,
            verify_attempts: 0,
            error: None,
        }
    }

    /// Returns the total number of rows written.
    pub fn rows_changed(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}
