//! Migration run reports.

use crate::error::MigrationError;
use ledgerline_protocol::{FailureKind, JobFailure, MigrationType, TypeReport, TypeStatus};
use std::time::Duration;

/// Why a type failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFailure {
    /// The failed type.
    pub migration_type: MigrationType,
    /// Failure category.
    pub kind: FailureKind,
    /// Error message.
    pub message: String,
}

impl TypeFailure {
    /// Creates a failure entry from an error.
    pub fn from_error(migration_type: MigrationType, error: &MigrationError) -> Self {
        Self {
            migration_type,
            kind: error.failure_kind(),
            message: error.to_string(),
        }
    }

    /// Converts the failure into a job failure.
    pub fn to_job_failure(&self) -> JobFailure {
        JobFailure::new(self.kind, format!("{}: {}", self.migration_type, self.message))
    }
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Per-type outcomes in migration order.
    pub types: Vec<TypeReport>,
    /// Failures in the order they happened.
    pub failures: Vec<TypeFailure>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl MigrationReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if every type was verified.
    pub fn is_success(&self) -> bool {
        self.types.iter().all(|t| t.status == TypeStatus::Verified)
    }

    /// Returns the report of a type.
    pub fn get(&self, migration_type: MigrationType) -> Option<&TypeReport> {
        self.types.iter().find(|t| t.migration_type == migration_type)
    }

    /// Returns the status of a type.
    pub fn status_of(&self, migration_type: MigrationType) -> Option<TypeStatus> {
        self.get(migration_type).map(|t| t.status)
    }

    /// Returns the first failure.
    pub fn first_failure(&self) -> Option<&TypeFailure> {
        self.failures.first()
    }

    /// Returns the types with the given status.
    pub fn types_with(&self, status: TypeStatus) -> Vec<MigrationType> {
        self.types
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.migration_type)
            .collect()
    }

    /// Returns the rows written across all types.
    pub fn rows_changed(&self) -> u64 {
        self.types.iter().map(TypeReport::rows_changed).sum()
    }
}
