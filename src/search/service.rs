//! Indexer facade and search execution

use crate::models::{Event, Subject};
use crate::search::config::IndexerConfig;
use crate::search::document::{DocumentBuilder, EventFields, TIMESTAMP_FIELD};
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::{IndexManager, IndexStats};
use crate::search::ontology::{Ontology, TypeExpander};
use crate::search::query::{Granularity, Ordering, QueryCompiler, SearchRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::Query;
use tantivy::schema::Value;
use tantivy::{DocAddress, Order, Searcher, TantivyDocument};
use tracing::{debug, info};

/// A single result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Event the row comes from
    pub event_id: u32,

    /// Set for subject-granularity results
    pub subject_uri: Option<String>,

    /// Event timestamp in milliseconds
    pub timestamp: i64,

    /// Relevance score; `None` for time-ordered results
    pub score: Option<f32>,
}

/// Search response with results and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Rows in the requested window
    pub hits: Vec<SearchHit>,

    /// Number of matching documents, independent of the window
    pub matches: usize,

    /// Offset used for pagination
    pub offset: usize,

    /// Requested maximum number of rows
    pub count: usize,

    /// Search execution time in milliseconds
    pub search_time_ms: u64,
}

impl SearchResponse {
    /// Event ids of the rows in order
    pub fn event_ids(&self) -> Vec<u32> {
        self.hits.iter().map(|hit| hit.event_id).collect()
    }
}

/// Stored fields needed to turn a document back into rows
struct StoredEvent {
    id: u32,
    timestamp: i64,
}

impl StoredEvent {
    fn read(doc: &TantivyDocument, fields: &EventFields) -> SearchResult<Self> {
        let id = doc
            .get_first(fields.id)
            .and_then(|v| v.as_u64())
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| SearchError::SearchFailed("Document without a valid event id".into()))?;
        let timestamp = doc
            .get_first(fields.timestamp)
            .and_then(|v| v.as_i64())
            .unwrap_or_default();

        Ok(Self { id, timestamp })
    }
}

fn stored_subjects(doc: &TantivyDocument, fields: &EventFields) -> SearchResult<Vec<Subject>> {
    match doc.get_first(fields.subjects).and_then(|v| v.as_str()) {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(Vec::new()),
    }
}

/// Full-text indexer over the event log
pub struct Indexer {
    /// Index manager
    manager: IndexManager,

    /// Type hierarchy used at index and query time
    expander: TypeExpander,

    /// Configuration
    config: IndexerConfig,
}

impl Indexer {
    /// Create a new indexer. No I/O happens until [`Indexer::initialize`].
    pub fn new(config: IndexerConfig, ontology: Arc<dyn Ontology>) -> Self {
        Self {
            manager: IndexManager::new(config.clone()),
            expander: TypeExpander::new(ontology),
            config,
        }
    }

    pub fn initialize(&self) -> SearchResult<()> {
        self.manager.initialize()
    }

    /// True when the index is open and was written by the current schema version
    pub fn check_index(&self) -> bool {
        self.manager.check_index()
    }

    pub fn drop_index(&self) -> SearchResult<()> {
        self.manager.drop_index()
    }

    /// Commit pending changes
    pub fn flush(&self) -> SearchResult<()> {
        self.manager.flush()
    }

    pub fn set_db_metadata(&self, key: &str, value: &str) -> SearchResult<()> {
        self.manager.set_db_metadata(key, value)
    }

    pub fn db_metadata(&self, key: &str) -> SearchResult<Option<String>> {
        self.manager.db_metadata(key)
    }

    pub fn expander(&self) -> &TypeExpander {
        &self.expander
    }

    /// Index a single event, replacing any previous version
    pub fn index_event(&self, event: &Event) -> SearchResult<()> {
        let engine = self.manager.engine()?;
        let document = DocumentBuilder::new(engine.fields(), &self.expander).build(event);
        self.manager.upsert_document(event.id, document)
    }

    /// Index multiple events
    pub fn index_events(&self, events: &[Event]) -> SearchResult<usize> {
        let engine = self.manager.engine()?;
        for event in events {
            let document = DocumentBuilder::new(engine.fields(), &self.expander).build(event);
            self.manager.upsert_document(event.id, document)?;
        }
        debug!(count = events.len(), "Indexed events");
        Ok(events.len())
    }

    /// Delete an event from the index
    pub fn delete_event(&self, event_id: u32) -> SearchResult<()> {
        self.manager.delete_document(event_id)
    }

    /// Rebuild the entire index from `events`
    pub fn rebuild(&self, events: &[Event]) -> SearchResult<usize> {
        self.drop_index()?;
        let indexed = self.index_events(events)?;
        self.flush()?;

        info!(events = indexed, "Rebuilt full-text index");
        Ok(indexed)
    }

    /// Get index statistics
    pub fn stats(&self) -> SearchResult<IndexStats> {
        self.manager.stats()
    }

    /// Run a search against the last flushed state of the index
    pub fn search(&self, request: &SearchRequest) -> SearchResult<SearchResponse> {
        let start_time = Instant::now();

        let engine = self.manager.engine()?;
        let searcher = engine.searcher();
        let query = QueryCompiler::new(engine.fields(), &self.expander).compile(
            engine.query_parser(),
            &request.text,
            &request.templates,
            request.time_range,
        )?;

        let matches = searcher
            .search(&*query, &Count)
            .map_err(|e| SearchError::SearchFailed(format!("Count failed: {}", e)))?;

        let count = request.count;
        let granularity = request.result_type.granularity();
        // Event rows map one to one onto matching documents
        let past_end = granularity == Granularity::Event && request.offset >= matches;

        let hits = if count == 0 || matches == 0 || past_end {
            Vec::new()
        } else {
            match granularity {
                Granularity::Event => self.collect_events(
                    &searcher,
                    engine.fields(),
                    &*query,
                    request,
                    count,
                    matches,
                )?,
                Granularity::Subject => self.collect_subjects(
                    &searcher,
                    engine.fields(),
                    &*query,
                    request,
                    count,
                    matches,
                )?,
            }
        };

        let search_time_ms = start_time.elapsed().as_millis() as u64;
        debug!(
            text = %request.text,
            result_type = %request.result_type,
            matches,
            returned = hits.len(),
            search_time_ms,
            "Search completed"
        );

        Ok(SearchResponse {
            hits,
            matches,
            offset: request.offset,
            count,
            search_time_ms,
        })
    }

    fn collect_events(
        &self,
        searcher: &Searcher,
        fields: &EventFields,
        query: &dyn Query,
        request: &SearchRequest,
        count: usize,
        matches: usize,
    ) -> SearchResult<Vec<SearchHit>> {
        let ranked = ranked_docs(
            searcher,
            query,
            request.result_type.ordering(),
            Window {
                limit: count,
                offset: request.offset,
                matches,
            },
        )?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (score, address) in ranked {
            let doc = retrieve(searcher, address)?;
            let stored = StoredEvent::read(&doc, fields)?;
            hits.push(SearchHit {
                event_id: stored.id,
                subject_uri: None,
                timestamp: stored.timestamp,
                score,
            });
        }
        Ok(hits)
    }

    /// Walk ranked events in growing batches until enough distinct subjects are found
    fn collect_subjects(
        &self,
        searcher: &Searcher,
        fields: &EventFields,
        query: &dyn Query,
        request: &SearchRequest,
        count: usize,
        matches: usize,
    ) -> SearchResult<Vec<SearchHit>> {
        let ordering = request.result_type.ordering();
        let wanted = request.offset.saturating_add(count);

        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        let mut fetched = 0;
        let mut batch = self.config.subject_batch_size.max(1);

        while rows.len() < wanted {
            let window = Window {
                limit: batch,
                offset: fetched,
                matches,
            };
            let ranked = ranked_docs(searcher, query, ordering, window)?;
            fetched += ranked.len();
            let exhausted = ranked.len() < batch || fetched >= matches;

            for (score, address) in ranked {
                let doc = retrieve(searcher, address)?;
                let stored = StoredEvent::read(&doc, fields)?;

                for subject in stored_subjects(&doc, fields)? {
                    if subject.uri.is_empty() || !request.matches_subject(&subject, &self.expander) {
                        continue;
                    }
                    if seen.insert(subject.uri.clone()) {
                        rows.push(SearchHit {
                            event_id: stored.id,
                            subject_uri: Some(subject.uri),
                            timestamp: stored.timestamp,
                            score,
                        });
                    }
                }
            }

            if exhausted {
                break;
            }
            batch = batch.saturating_mul(2);
        }

        Ok(rows.into_iter().skip(request.offset).take(count).collect())
    }
}

/// A slice of the ranked documents
#[derive(Debug, Clone, Copy)]
struct Window {
    limit: usize,
    offset: usize,
    /// Total matching documents; the window never reaches past it
    matches: usize,
}

impl Window {
    /// `(limit, offset)` clamped to the matching documents, or `None` when empty.
    ///
    /// tantivy sizes its collector buffer from `limit + offset`.
    fn clamped(&self) -> Option<(usize, usize)> {
        if self.limit == 0 || self.offset >= self.matches {
            return None;
        }
        Some((self.limit.min(self.matches - self.offset), self.offset))
    }
}

/// One window of ranked documents
fn ranked_docs(
    searcher: &Searcher,
    query: &dyn Query,
    ordering: Ordering,
    window: Window,
) -> SearchResult<Vec<(Option<f32>, DocAddress)>> {
    let Some((limit, offset)) = window.clamped() else {
        return Ok(Vec::new());
    };
    let top_docs = TopDocs::with_limit(limit).and_offset(offset);

    let ranked = match ordering {
        Ordering::Relevance => searcher
            .search(query, &top_docs)
            .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?
            .into_iter()
            .map(|(score, address)| (Some(score), address))
            .collect(),
        Ordering::NewestFirst | Ordering::OldestFirst => {
            let order = if ordering == Ordering::NewestFirst {
                Order::Desc
            } else {
                Order::Asc
            };
            let collector = top_docs.order_by_fast_field::<i64>(TIMESTAMP_FIELD, order);
            searcher
                .search(query, &collector)
                .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?
                .into_iter()
                .map(|(_, address)| (None, address))
                .collect()
        }
    };

    Ok(ranked)
}

fn retrieve(searcher: &Searcher, address: DocAddress) -> SearchResult<TantivyDocument> {
    searcher
        .doc::<TantivyDocument>(address)
        .map_err(|e| SearchError::SearchFailed(format!("Failed to retrieve doc: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ontology::TypeRegistry;
    use crate::search::query::ResultType;
    use tempfile::TempDir;

    fn create_test_indexer(temp_dir: &TempDir) -> Indexer {
        let config = IndexerConfig {
            index_path: temp_dir.path().join("fts.index"),
            subject_batch_size: 1,
            ..Default::default()
        };
        let indexer = Indexer::new(config, Arc::new(TypeRegistry::new()));
        indexer.initialize().unwrap();
        indexer
    }

    #[test]
    fn test_service_creation() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&temp_dir);
        let stats = indexer.stats().unwrap();
        assert_eq!(stats.total_documents, 0);
    }

    #[test]
    fn test_index_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&temp_dir);

        let event = Event::new(7, 1000).with_subject(Subject::new("file:///docs/report.txt").with_text("Quarterly report"));
        indexer.index_event(&event).unwrap();

        // Not visible until flushed
        let response = indexer.search(&SearchRequest::new("quarterly")).unwrap();
        assert_eq!(response.matches, 0);

        indexer.flush().unwrap();
        let response = indexer.search(&SearchRequest::new("quarterly")).unwrap();
        assert_eq!(response.matches, 1);
        assert_eq!(response.event_ids(), vec![7]);
        assert!(response.hits[0].score.is_some());
        assert_eq!(response.hits[0].timestamp, 1000);
    }

    #[test]
    fn test_zero_count_reports_matches_only() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&temp_dir);

        indexer
            .index_events(&[
                Event::new(1, 10).with_subject(Subject::new("file:///a.txt")),
                Event::new(2, 20).with_subject(Subject::new("file:///b.txt")),
            ])
            .unwrap();
        indexer.flush().unwrap();

        let response = indexer.search(&SearchRequest::new("").with_count(0)).unwrap();
        assert_eq!(response.matches, 2);
        assert!(response.hits.is_empty());
    }

    #[test]
    fn test_window_stays_inside_matches() {
        let window = |limit, offset, matches| Window { limit, offset, matches }.clamped();

        assert_eq!(window(10, 0, 3), Some((3, 0)));
        assert_eq!(window(10, 2, 3), Some((1, 2)));
        assert_eq!(window(usize::MAX, 1, 3), Some((2, 1)));
        assert_eq!(window(10, 3, 3), None);
        assert_eq!(window(10, u32::MAX as usize, 3), None);
        assert_eq!(window(10, usize::MAX - 5, 3), None);
        assert_eq!(window(0, 0, 3), None);
    }

    #[test]
    fn test_subject_rows_span_batches() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&temp_dir);

        let events: Vec<Event> = (1..=5)
            .map(|id| {
                Event::new(id, i64::from(id) * 100)
                    .with_subject(Subject::new(format!("file:///notes/{}.txt", id)))
                    .with_subject(Subject::new("file:///notes/shared.txt"))
            })
            .collect();
        indexer.index_events(&events).unwrap();
        indexer.flush().unwrap();

        let request = SearchRequest::new("notes")
            .with_result_type(ResultType::MostRecentSubjects)
            .with_count(10);
        let response = indexer.search(&request).unwrap();

        // Five distinct URIs plus the shared one, reported once
        assert_eq!(response.hits.len(), 6);
        let shared: Vec<_> = response
            .hits
            .iter()
            .filter(|hit| hit.subject_uri.as_deref() == Some("file:///notes/shared.txt"))
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].event_id, 5);
        assert!(response.hits.iter().all(|hit| hit.score.is_none()));
    }
}
