//! Search index lifecycle management

use crate::search::config::IndexerConfig;
use crate::search::document::{build_event_schema, text_analyzer, EventFields, TEXT_TOKENIZER};
use crate::search::error::{SearchError, SearchResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tantivy::query::QueryParser;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, info, warn};

/// Schema version of the on-disk index. A different stored value forces a rebuild.
pub const INDEX_VERSION: &str = "1";

/// Metadata key holding the schema version
pub const INDEX_VERSION_KEY: &str = "fts_index_version";

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of live documents visible to new searches
    pub total_documents: u64,

    /// Number of segments
    pub num_segments: usize,

    /// Index size in bytes
    pub index_size_bytes: u64,
}

/// Writer plus the metadata that goes out with its next commit
struct WriterState {
    writer: IndexWriter,
    metadata: BTreeMap<String, String>,
}

/// Open tantivy resources.
///
/// Fields drop in declaration order, which is the reverse of the order
/// they are acquired in [`Engine::open`].
pub(crate) struct Engine {
    query_parser: QueryParser,
    reader: IndexReader,
    writer: Mutex<WriterState>,
    fields: EventFields,
    index: Index,
}

impl Engine {
    fn open(
        index: Index,
        fields: EventFields,
        metadata: BTreeMap<String, String>,
        config: &IndexerConfig,
    ) -> SearchResult<Self> {
        index.tokenizers().register(TEXT_TOKENIZER, text_analyzer());

        let writer: IndexWriter = index
            .writer_with_num_threads(config.indexing_threads, config.writer_heap_size)
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create writer: {}", e)))?;

        // Reloaded explicitly on flush so visibility follows commits exactly
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        let mut query_parser = QueryParser::for_index(&index, vec![fields.text]);
        query_parser.set_conjunction_by_default();

        Ok(Self {
            query_parser,
            reader,
            writer: Mutex::new(WriterState { writer, metadata }),
            fields,
            index,
        })
    }

    pub(crate) fn fields(&self) -> &EventFields {
        &self.fields
    }

    pub(crate) fn query_parser(&self) -> &QueryParser {
        &self.query_parser
    }

    /// Snapshot of the index as of the last flush
    pub(crate) fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    /// Replace the document for `id`
    pub(crate) fn upsert(&self, id: u32, document: TantivyDocument) -> SearchResult<()> {
        let state = self.writer.lock();
        state.writer.delete_term(self.id_term(id));
        state
            .writer
            .add_document(document)
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to add document {}: {}", id, e)))?;
        Ok(())
    }

    pub(crate) fn delete(&self, id: u32) {
        let state = self.writer.lock();
        state.writer.delete_term(self.id_term(id));
    }

    fn set_metadata(&self, key: &str, value: &str) {
        self.writer.lock().metadata.insert(key.to_string(), value.to_string());
    }

    /// Commit pending documents and metadata together, then expose them to new searches
    fn commit(&self) -> SearchResult<()> {
        {
            let mut state = self.writer.lock();
            let payload = serde_json::to_string(&state.metadata)?;
            let mut prepared = state
                .writer
                .prepare_commit()
                .map_err(|e| SearchError::IndexingFailed(format!("Failed to prepare commit: {}", e)))?;
            prepared.set_payload(&payload);
            prepared
                .commit()
                .map_err(|e| SearchError::IndexingFailed(format!("Failed to commit: {}", e)))?;
        }

        self.reader
            .reload()
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to reload reader: {}", e)))?;
        Ok(())
    }

    /// Metadata as of the last commit
    fn committed_metadata(&self) -> SearchResult<BTreeMap<String, String>> {
        let metas = self.index.load_metas()?;
        Ok(parse_metadata(metas.payload.as_deref()))
    }

    fn id_term(&self, id: u32) -> Term {
        Term::from_field_u64(self.fields.id, u64::from(id))
    }
}

enum EngineState {
    Closed,
    /// The on-disk index was written by a different schema version
    Stale { stored_version: Option<String> },
    Ready(Arc<Engine>),
}

/// Owns the tantivy index and enforces single-writer access to it
pub struct IndexManager {
    state: RwLock<EngineState>,
    config: IndexerConfig,
}

impl IndexManager {
    /// Create a closed manager; call [`IndexManager::initialize`] to open the index
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            state: RwLock::new(EngineState::Closed),
            config,
        }
    }

    /// Open or create the index. Re-initialising closes the previous handles first.
    pub fn initialize(&self) -> SearchResult<()> {
        self.config.validate()?;

        let mut state = self.state.write();
        *state = EngineState::Closed;
        *state = self.open()?;
        Ok(())
    }

    fn open(&self) -> SearchResult<EngineState> {
        let path = &self.config.index_path;
        std::fs::create_dir_all(path).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
        })?;

        if !Self::index_exists(path) {
            return self.create(path);
        }

        let index = Index::open_in_dir(path).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to open existing index: {}", e))
        })?;
        let metas = index.load_metas().map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to read index metadata: {}", e))
        })?;
        let metadata = parse_metadata(metas.payload.as_deref());

        let stored_version = metadata.get(INDEX_VERSION_KEY).cloned();
        if stored_version.as_deref() != Some(INDEX_VERSION) {
            warn!(
                path = %path.display(),
                stored = ?stored_version,
                expected = INDEX_VERSION,
                "Index version mismatch, rebuild required"
            );
            return Ok(EngineState::Stale { stored_version });
        }

        let fields = match EventFields::from_schema(&index.schema()) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Index schema incompatible, rebuild required");
                return Ok(EngineState::Stale { stored_version });
            }
        };

        let engine = Engine::open(index, fields, metadata, &self.config)?;
        info!(path = %path.display(), "Opened full-text index");
        Ok(EngineState::Ready(Arc::new(engine)))
    }

    fn create(&self, path: &Path) -> SearchResult<EngineState> {
        let schema = build_event_schema();
        let fields = EventFields::from_schema(&schema)?;
        let index = Index::create_in_dir(path, schema).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to create new index: {}", e))
        })?;

        let metadata = BTreeMap::from([(INDEX_VERSION_KEY.to_string(), INDEX_VERSION.to_string())]);
        let engine = Engine::open(index, fields, metadata, &self.config)?;
        engine
            .commit()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to write index version: {}", e)))?;

        info!(path = %path.display(), version = INDEX_VERSION, "Created full-text index");
        Ok(EngineState::Ready(Arc::new(engine)))
    }

    /// Check if an index exists at the given path
    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    /// The open engine, or `IndexNotReady`
    pub(crate) fn engine(&self) -> SearchResult<Arc<Engine>> {
        match &*self.state.read() {
            EngineState::Ready(engine) => Ok(Arc::clone(engine)),
            EngineState::Stale { stored_version } => Err(SearchError::IndexNotReady(format!(
                "index version {:?} does not match {}",
                stored_version, INDEX_VERSION
            ))),
            EngineState::Closed => Err(SearchError::IndexNotReady("index is not initialized".into())),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.read(), EngineState::Ready(_))
    }

    /// True iff the index is open and its committed version matches [`INDEX_VERSION`]
    pub fn check_index(&self) -> bool {
        let Ok(engine) = self.engine() else {
            return false;
        };
        match engine.committed_metadata() {
            Ok(metadata) => metadata.get(INDEX_VERSION_KEY).map(String::as_str) == Some(INDEX_VERSION),
            Err(e) => {
                warn!(error = %e, "Failed to read index metadata");
                false
            }
        }
    }

    /// Delete every document and all metadata, leaving a fresh empty index
    pub fn drop_index(&self) -> SearchResult<()> {
        let mut state = self.state.write();
        *state = EngineState::Closed;

        let path = &self.config.index_path;
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        *state = self.open()?;

        info!(path = %path.display(), "Dropped full-text index");
        Ok(())
    }

    /// Commit pending writes so that new searches observe them
    pub fn flush(&self) -> SearchResult<()> {
        self.engine()?.commit()?;
        debug!("Flushed full-text index");
        Ok(())
    }

    /// Set a metadata key; visible after the next flush
    pub fn set_db_metadata(&self, key: &str, value: &str) -> SearchResult<()> {
        self.engine()?.set_metadata(key, value);
        Ok(())
    }

    /// Read a committed metadata key
    pub fn db_metadata(&self, key: &str) -> SearchResult<Option<String>> {
        Ok(self.engine()?.committed_metadata()?.remove(key))
    }

    /// Replace the document for `id`; visible after the next flush
    pub fn upsert_document(&self, id: u32, document: TantivyDocument) -> SearchResult<()> {
        self.engine()?.upsert(id, document)?;
        debug!(event_id = id, "Queued document upsert");
        Ok(())
    }

    /// Remove the document for `id`; absent ids are ignored
    pub fn delete_document(&self, id: u32) -> SearchResult<()> {
        self.engine()?.delete(id);
        debug!(event_id = id, "Queued document deletion");
        Ok(())
    }

    /// Get index statistics
    pub fn stats(&self) -> SearchResult<IndexStats> {
        let searcher = self.engine()?.searcher();

        let index_size_bytes = std::fs::read_dir(&self.config.index_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum::<u64>()
            })
            .unwrap_or(0);

        Ok(IndexStats {
            total_documents: searcher.num_docs(),
            num_segments: searcher.segment_readers().len(),
            index_size_bytes,
        })
    }
}

fn parse_metadata(payload: Option<&str>) -> BTreeMap<String, String> {
    match payload {
        Some(payload) => serde_json::from_str(payload).unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable index metadata, treating as empty");
            BTreeMap::new()
        }),
        None => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> IndexManager {
        let config = IndexerConfig {
            index_path: temp_dir.path().join("index"),
            ..Default::default()
        };
        IndexManager::new(config)
    }

    #[test]
    fn test_index_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        assert!(!manager.is_ready());
        assert!(manager.initialize().is_ok());
        assert!(manager.is_ready());
        assert!(manager.check_index());
        assert_eq!(
            manager.db_metadata(INDEX_VERSION_KEY).unwrap().as_deref(),
            Some(INDEX_VERSION)
        );
    }

    #[test]
    fn test_index_stats() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.initialize().unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.total_documents, 0);
    }

    #[test]
    fn test_operations_before_initialize_are_not_ready() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        assert!(!manager.check_index());
        assert!(matches!(manager.flush(), Err(SearchError::IndexNotReady(_))));
        assert!(matches!(
            manager.set_db_metadata("k", "v"),
            Err(SearchError::IndexNotReady(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let temp_dir = TempDir::new().unwrap();
        let config = IndexerConfig {
            index_path: temp_dir.path().join("index"),
            indexing_threads: 0,
            ..Default::default()
        };
        let manager = IndexManager::new(config);

        assert!(matches!(
            manager.initialize(),
            Err(SearchError::InvalidConfiguration(_))
        ));
        assert!(!temp_dir.path().join("index").exists());
    }

    #[test]
    fn test_metadata_visible_after_flush() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.initialize().unwrap();

        manager.set_db_metadata("last_rebuild", "a").unwrap();
        assert_eq!(manager.db_metadata("last_rebuild").unwrap(), None);

        manager.set_db_metadata("last_rebuild", "b").unwrap();
        manager.flush().unwrap();
        assert_eq!(manager.db_metadata("last_rebuild").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_version_mismatch_marks_index_stale() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        manager.initialize().unwrap();

        manager.set_db_metadata(INDEX_VERSION_KEY, "0").unwrap();
        manager.flush().unwrap();
        assert!(!manager.check_index());

        // Reopening a stale index does not fail, it just is not usable
        manager.initialize().unwrap();
        assert!(!manager.is_ready());
        assert!(!manager.check_index());

        manager.drop_index().unwrap();
        assert!(manager.check_index());
    }

    #[test]
    fn test_parse_metadata() {
        assert!(parse_metadata(None).is_empty());
        assert!(parse_metadata(Some("not json")).is_empty());
        assert_eq!(
            parse_metadata(Some(r#"{"fts_index_version":"1"}"#)).get(INDEX_VERSION_KEY),
            Some(&"1".to_string())
        );
    }
}
