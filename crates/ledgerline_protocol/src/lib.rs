//! # Ledgerline Protocol
//!
//! Data types and wire messages shared by every Ledgerline crate.
//!
//! This crate provides:
//! - `ChangeRecord` and `LocalStackMessage`, the units of change notification
//! - `MigrationType`, `RowMetadata` and `Row` for cross-store migration
//! - `RangeChecksum`, a salted order-independent checksum over `(id, etag)` pairs
//! - Job request and status messages for the asynchronous job facade
//! - `TableStatusEvent`, the materialized-view trigger event
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod codec;
mod error;
mod event;
mod job;
mod message;
mod migration;
mod object;

pub use checksum::{ChecksumAccumulator, ChecksumRequest, RangeChecksum};
pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{TableState, TableStatusEvent};
pub use job::{
    FailureKind, FileHandleRef, JobFailure, JobId, JobProgress, JobRequest, JobResult, JobState,
    JobStatus,
};
pub use message::{now_millis, ChangeRecord, LocalChange, LocalStackMessage, Message, ObjectKey};
pub use migration::{MigrationType, Row, RowMetadata, TypeReport, TypeStatus};
pub use object::{ChangeNumber, ChangeType, ObjectType};
