//! Error types for search operations

use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during index and search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Index is closed or has a stale schema version
    #[error("Index not ready: {0}")]
    IndexNotReady(String),

    /// Query parsing failed
    #[error("Query parsing failed: {0}")]
    QueryParsingFailed(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    IndexingFailed(String),

    /// Schema error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Metadata or stored subject (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    TantivyError(String),
}

impl SearchError {
    /// Whether the error comes from the caller's query text rather than the index
    pub fn is_query_error(&self) -> bool {
        matches!(self, SearchError::QueryParsingFailed(_))
    }
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::TantivyError(err.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for SearchError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        SearchError::QueryParsingFailed(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            SearchError::IoError(err) => AppError::Io(err),
            other => AppError::Search(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_classification() {
        assert!(SearchError::QueryParsingFailed("x".into()).is_query_error());
        assert!(!SearchError::IndexNotReady("x".into()).is_query_error());
    }

    #[test]
    fn test_conversion_to_app_error() {
        let err: AppError = SearchError::InvalidConfiguration("bad path".into()).into();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let err: AppError = SearchError::IndexNotReady("closed".into()).into();
        assert_eq!(err.error_code(), "SEARCH_ERROR");
    }
}
