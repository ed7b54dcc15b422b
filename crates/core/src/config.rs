use crate::chunking::ChunkingConfig;
use crate::compare::CompareConfig;
use crate::embeddings::EmbeddingConfig;
use crate::error::ConfigError;
use crate::index::IndexConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    /// Snippet length in characters.
    pub snippet_chars: usize,
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_chars: 240,
            default_top_k: 5,
        }
    }
}

/// Every tunable of the pipeline. Missing sections and fields fall back to
/// their defaults, so a config file only needs the overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub compare: CompareConfig,
    pub search: SearchConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be greater than 0".to_string(),
            ));
        }
        if self.search.snippet_chars == 0 {
            return Err(ConfigError::Invalid(
                "search.snippet_chars must be greater than 0".to_string(),
            ));
        }
        self.compare.validate()
    }
}
