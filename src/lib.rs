//! Full-text index and query compiler for an activity event log
//!
//! Events are indexed into a [tantivy](https://docs.rs/tantivy) index and
//! searched with free text combined with structured event templates. See
//! [`search::Indexer`] for the entry point.

pub mod config;
pub mod error;
pub mod models;
pub mod search;

pub use error::{AppError, Result};
