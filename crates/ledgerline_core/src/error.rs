//! Error types for Ledgerline core.

use ledgerline_protocol::ProtocolError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the outbox, ledger and transaction manager.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Operation requires a transaction in a different state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the violated precondition.
        message: String,
    },

    /// The ledger could not record a change. Fatal to the enclosing transaction.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// A buffered message reached delivery in a form it cannot be delivered in.
    #[error("unknown message kind: {kind}")]
    UnknownMessageKind {
        /// The offending message kind.
        kind: String,
    },

    /// Bad input at the call site.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// An observer rejected a delivery.
    #[error("observer error: {message}")]
    Observer {
        /// Description of the failure.
        message: String,
    },

    /// Message validation or encoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates an unknown message kind error.
    pub fn unknown_message_kind(kind: impl Into<String>) -> Self {
        Self::UnknownMessageKind { kind: kind.into() }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an observer error.
    pub fn observer(message: impl Into<String>) -> Self {
        Self::Observer {
            message: message.into(),
        }
    }
}
