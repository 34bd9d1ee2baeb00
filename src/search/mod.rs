//! Full-text search over the activity event log, powered by Tantivy
//!
//! This module provides:
//!
//! - **Indexing**: one document per event with free text drawn from subject
//!   text, URIs, tags and the actor's application name
//! - **Template Filters**: structured event/subject templates with `!`
//!   negation and trailing `*` prefix matching
//! - **Type Hierarchy**: interpretation and manifestation filters match
//!   every subtype through an injected [`Ontology`]
//! - **Result Types**: event or subject rows, ordered by relevance or time
//! - **Versioned Storage**: the index records its schema version and asks
//!   for a rebuild when it changes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Indexer                             │
//! ├─────────────────────────────────────────────────┤
//! │  - index_event()   - delete_event()             │
//! │  - search()        - rebuild()                  │
//! └─────────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌────────────────────┐   ┌────────────────────────┐
//! │  DocumentBuilder   │   │  QueryCompiler         │
//! │  (event -> doc)    │   │  (request -> query)    │
//! └────────────────────┘   └────────────────────────┘
//!          │     TypeExpander (Ontology)  │
//!          ▼                          ▼
//! ┌─────────────────────────────────────────────────┐
//! │           Index Manager                          │
//! ├─────────────────────────────────────────────────┤
//! │  - Open / create / drop, version check          │
//! │  - Single writer, snapshot readers              │
//! │  - Commit payload metadata                      │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zeitgeist_fts::models::{Event, Subject};
//! use zeitgeist_fts::search::{Indexer, IndexerConfig, SearchRequest, TypeRegistry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ontology = TypeRegistry::new().with_subtype("nfo:Audio", "nfo:Media");
//!     let indexer = Indexer::new(IndexerConfig::default(), Arc::new(ontology));
//!     indexer.initialize()?;
//!
//!     let event = Event::new(1, 1_700_000_000_000)
//!         .with_actor("application://gedit.desktop")
//!         .with_subject(Subject::new("file:///home/user/report.txt").with_text("Quarterly report"));
//!     indexer.index_event(&event)?;
//!     indexer.flush()?;
//!
//!     let results = indexer.search(&SearchRequest::new("report"))?;
//!     println!("Found {} events", results.matches);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod document;
mod error;
mod index;
mod ontology;
mod query;
mod service;

pub use config::{IndexerConfig, IndexerConfigBuilder};
pub use document::{build_event_schema, text_analyzer, DocumentBuilder, EventFields, TEXT_TOKENIZER};
pub use error::{SearchError, SearchResult};
pub use index::{IndexManager, IndexStats, INDEX_VERSION, INDEX_VERSION_KEY};
pub use ontology::{resolve_uri, Ontology, TypeExpander, TypeRegistry};
pub use query::{
    EventTemplate, Granularity, Ordering, QueryCompiler, ResultType, SearchRequest,
    SubjectTemplate, TimeRange,
};
pub use service::{Indexer, SearchHit, SearchResponse};
