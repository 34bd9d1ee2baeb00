//! Common test utilities for indexer testing
//!
//! Provides a temporary indexer with a small media type hierarchy and
//! helpers for building events.

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use zeitgeist_fts::models::{Event, Subject};
use zeitgeist_fts::search::{Indexer, IndexerConfig, TypeRegistry};

/// Install a fmt subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// `nfo:Audio`/`nfo:Video` under `nfo:Media` under `nie:InformationElement`
pub fn media_registry() -> TypeRegistry {
    TypeRegistry::new()
        .with_subtype("nfo:Audio", "nfo:Media")
        .with_subtype("nfo:Video", "nfo:Media")
        .with_subtype("nfo:Media", "nie:InformationElement")
        .with_subtype("nfo:Document", "nie:InformationElement")
}

/// An initialised indexer in a temporary directory.
///
/// The directory lives as long as the returned `TempDir`.
pub fn create_test_indexer() -> (TempDir, Indexer) {
    create_test_indexer_with(|config| config)
}

pub fn create_test_indexer_with(
    configure: impl FnOnce(IndexerConfig) -> IndexerConfig,
) -> (TempDir, Indexer) {
    init_tracing();

    let temp_dir = TempDir::new().unwrap();
    let config = configure(IndexerConfig {
        index_path: temp_dir.path().join("fts.index"),
        ..Default::default()
    });

    let indexer = Indexer::new(config, Arc::new(media_registry()));
    indexer.initialize().unwrap();
    (temp_dir, indexer)
}

/// Event with one subject carrying `text`
pub fn text_event(id: u32, timestamp: i64, uri: &str, text: &str) -> Event {
    Event::new(id, timestamp).with_subject(Subject::new(uri).with_text(text))
}

/// Index `events` and flush
pub fn index_all(indexer: &Indexer, events: &[Event]) {
    indexer.index_events(events).unwrap();
    indexer.flush().unwrap();
}
