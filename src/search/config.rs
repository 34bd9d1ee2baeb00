//! Indexer configuration

use crate::search::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full-text indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Index writer heap size in bytes (default: 50MB)
    #[serde(default = "default_writer_heap_size")]
    pub writer_heap_size: usize,

    /// Number of threads for indexing
    #[serde(default = "default_indexing_threads")]
    pub indexing_threads: usize,

    /// Number of ranked hits fetched per round when resolving subject rows
    #[serde(default = "default_subject_batch_size")]
    pub subject_batch_size: usize,
}

/// `$XDG_DATA_HOME/zeitgeist/fts.index`, falling back to `~/.local/share`
fn default_index_path() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("zeitgeist").join("fts.index")
}

fn default_writer_heap_size() -> usize {
    50_000_000
}

fn default_indexing_threads() -> usize {
    1
}

fn default_subject_batch_size() -> usize {
    64
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            writer_heap_size: default_writer_heap_size(),
            indexing_threads: default_indexing_threads(),
            subject_batch_size: default_subject_batch_size(),
        }
    }
}

/// Smallest writer heap tantivy accepts per indexing thread
const MIN_HEAP_PER_THREAD: usize = 15_000_000;

impl IndexerConfig {
    /// Reject settings the index writer cannot run with
    pub fn validate(&self) -> SearchResult<()> {
        if self.indexing_threads == 0 {
            return Err(SearchError::InvalidConfiguration(
                "indexing_threads must be at least 1".into(),
            ));
        }
        if self.writer_heap_size / self.indexing_threads < MIN_HEAP_PER_THREAD {
            return Err(SearchError::InvalidConfiguration(format!(
                "writer_heap_size must be at least {} bytes per indexing thread",
                MIN_HEAP_PER_THREAD
            )));
        }
        if self.subject_batch_size == 0 {
            return Err(SearchError::InvalidConfiguration(
                "subject_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for IndexerConfig
pub struct IndexerConfigBuilder {
    config: IndexerConfig,
}

impl IndexerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn indexing_threads(mut self, threads: usize) -> Self {
        self.config.indexing_threads = threads;
        self
    }

    pub fn subject_batch_size(mut self, size: usize) -> Self {
        self.config.subject_batch_size = size;
        self
    }

    pub fn build(self) -> IndexerConfig {
        self.config
    }
}

impl Default for IndexerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_ends_with_index_dir() {
        let config = IndexerConfig::default();
        assert!(config.index_path.ends_with("zeitgeist/fts.index"));
        assert_eq!(config.writer_heap_size, 50_000_000);
    }

    #[test]
    fn test_builder_overrides() {
        let config = IndexerConfigBuilder::new()
            .index_path("/tmp/fts")
            .subject_batch_size(8)
            .build();

        assert_eq!(config.index_path, PathBuf::from("/tmp/fts"));
        assert_eq!(config.subject_batch_size, 8);
    }

    #[test]
    fn test_validation() {
        assert!(IndexerConfig::default().validate().is_ok());

        let config = IndexerConfigBuilder::new().indexing_threads(0).build();
        assert!(matches!(config.validate(), Err(SearchError::InvalidConfiguration(_))));

        let config = IndexerConfigBuilder::new()
            .writer_heap_size(40_000_000)
            .indexing_threads(4)
            .build();
        assert!(config.validate().is_err());

        let config = IndexerConfigBuilder::new().subject_batch_size(0).build();
        assert!(config.validate().is_err());
    }
}
