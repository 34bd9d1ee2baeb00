use crate::error::Result;
use crate::search::{IndexerConfig, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "ZG_FTS_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Indexer configuration
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// TOML type registry loaded by [`Config::load_ontology`]
    #[serde(default)]
    pub ontology_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/fts.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration with `config_path` as the optional override file
    pub fn load_from(config_path: &str) -> Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(config_path).required(false))
            // Override with environment variables, e.g. ZG_FTS__INDEXER__MAX_RESULTS
            .add_source(
                config::Environment::with_prefix("ZG_FTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// The configured type registry, or an empty one
    pub fn load_ontology(&self) -> Result<TypeRegistry> {
        let Some(path) = &self.ontology_path else {
            return Ok(TypeRegistry::new());
        };

        let source = std::fs::read_to_string(path)?;
        let registry = TypeRegistry::from_toml_str(&source)?;
        debug!(path = %path.display(), types = registry.len(), "Loaded type registry");
        Ok(registry)
    }
}
