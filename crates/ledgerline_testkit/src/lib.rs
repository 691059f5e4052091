//! # Ledgerline Testkit
//!
//! Test utilities for Ledgerline.
//!
//! This crate provides:
//! - Recording and failing observers
//! - Row store fixtures and a fast migration configuration
//! - Property-based test generators using proptest
//! - Concurrent commit stress helpers
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerline_testkit::prelude::*;
//!
//! #[test]
//! fn delivers_changes() {
//!     init_tracing();
//!     let (outbox, observer) = recorded_outbox();
//!     // ... run transactions
//!     assert_eq!(observer.change_count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
