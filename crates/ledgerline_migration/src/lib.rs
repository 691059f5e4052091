//! # Ledgerline Migration
//!
//! Diff-based migration of typed rows from a source store to a destination
//! store.
//!
//! This crate provides:
//! - `RowStore`, the interface a store exposes to the engine
//! - `MemoryRowStore`, an in-memory store with failure injection
//! - `MergeDiff`, a lazy sorted-merge diff of two metadata streams
//! - `MigrationCatalog`, the dependency-ordered list of types
//! - `MigrationEngine`, which applies diffs in batches and verifies each
//!   type with salted range checksums
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerline_migration::{MemoryRowStore, MigrationConfig, MigrationEngine};
//!
//! let engine = MigrationEngine::new(MigrationConfig::new("salt"), source, destination);
//! let report = engine.migrate_all()?;
//! assert!(report.is_success());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod diff;
mod engine;
mod error;
mod report;
mod retry;
mod store;
mod stream;

pub use catalog::{CatalogEntry, MigrationCatalog};
pub use config::{MigrationConfig, RetryConfig};
pub use diff::{diff_metadata, DiffOp, MergeDiff};
pub use engine::{
    MigrationEngine, MigrationProgress, MigrationState, MigrationStats, ProgressCallback,
};
pub use error::{MigrationError, MigrationResult};
pub use report::{MigrationReport, TypeFailure};
pub use store::{MemoryRowStore, MetadataPage, RowStore, StoreEvent, StoreOp};
pub use stream::MetadataStream;
