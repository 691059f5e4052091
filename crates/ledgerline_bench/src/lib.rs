//! Benchmark support for Ledgerline.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
