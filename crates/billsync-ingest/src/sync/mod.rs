//! Incremental pull of one collection
//!
//! [`fetcher`] retrieves single pages with retries; [`resolver`] decides how
//! much of the collection to pull and drives the fetcher until the pull is
//! done.

pub mod fetcher;
pub mod resolver;

pub use fetcher::{FetchedPage, PageFetcher};
pub use resolver::{decide_mode, Peek, PullResult, StopReason, SyncMode, SyncResolver};
