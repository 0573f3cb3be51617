//! Request-coalescing batch loading.
//!
//! A [`BatchLoader`] collects every key requested within one scheduling turn
//! and hands them to a single batch function call, then fans the results back
//! out to the individual callers by position. Nothing is cached between
//! turns; each flush is independent.
//!
//! This crate knows nothing about any particular backend. The directory and
//! master-record specialisations live in `adsync-sync`.

mod dedup;
mod error;
mod loader;

pub use dedup::remove_duplicates;
pub use error::BatchError;
pub use loader::{BatchLoader, BatchOptions};
