//! Billsync Common Library
//!
//! Shared types, logging and error handling for the billsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BillsyncError`] and the crate [`Result`] alias
//! - **Logging**: console/file subscriber setup driven by `LOG_*` variables
//! - **Types**: sync cursors, collection kinds and record classifications
//!
//! # Example
//!
//! ```no_run
//! use billsync_common::types::SyncCursor;
//!
//! let cursor = SyncCursor::new(4_812, 12_000);
//! assert!(!cursor.is_fresh());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BillsyncError, Result};
