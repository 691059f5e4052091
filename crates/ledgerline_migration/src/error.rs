//! Error types for the migration engine.

use ledgerline_protocol::{FailureKind, MigrationType, ProtocolError};
use thiserror::Error;

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors that can occur while migrating between stores.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A remote read or write failed and may succeed if repeated.
    #[error("transient I/O error: {message}")]
    TransientIo {
        /// Error message.
        message: String,
    },

    /// Checksums still disagree after re-diffing the type.
    #[error(
        "checksum mismatch for {migration_type} after {attempts} attempts: \
         source {source_checksum}, destination {destination_checksum}"
    )]
    Consistency {
        /// The type that failed verification.
        migration_type: MigrationType,
        /// Checksum reported by the source.
        source_checksum: String,
        /// Checksum reported by the destination.
        destination_checksum: String,
        /// Number of verifications run.
        attempts: u32,
    },

    /// A store rejected an operation.
    #[error("store error: {0}")]
    Store(String),

    /// The migration catalog is not valid.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A metadata stream was not strictly ascending by id.
    #[error("{side} metadata out of order: {next} after {previous}")]
    OutOfOrder {
        /// Which stream broke ordering.
        side: &'static str,
        /// The previous id.
        previous: u64,
        /// The offending id.
        next: u64,
    },

    /// The migration was cancelled.
    #[error("migration cancelled")]
    Cancelled,

    /// A transient failure persisted through every retry.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last error seen.
        last_error: String,
    },

    /// The engine cannot start from its current state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Protocol validation failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl MigrationError {
    /// Creates a transient I/O error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates an invalid catalog error.
    pub fn invalid_catalog(message: impl Into<String>) -> Self {
        Self::InvalidCatalog(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::TransientIo { .. })
    }

    /// Returns the job failure category of this error.
    ///
    /// Checksum mismatches are reported apart from I/O failures so that
    /// operators can tell data divergence from an unreachable store.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MigrationError::Consistency { .. } => FailureKind::Consistency,
            MigrationError::TransientIo { .. } | MigrationError::RetriesExhausted { .. } => {
                FailureKind::TransientIo
            }
            MigrationError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }
}
