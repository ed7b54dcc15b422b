use crate::models::SourceFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("{format} extraction failed: {details}")]
    Extraction {
        format: SourceFormat,
        details: String,
    },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("index error: {0}")]
    Index(#[from] SearchError),

    #[error("ingestion worker failed: {0}")]
    Worker(String),
}

/// Non-fatal extraction outcome. Image-only PDFs land here instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionWarning {
    #[error("document has no extractable text (image-only or blank)")]
    EmptyText,
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// A chunk exists without its vector, or a vector without its chunk.
    #[error("index out of sync with stored chunks at {chunk_id}")]
    IndexOutOfSync { chunk_id: String },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("comparison needs 2 or 3 documents, got {0}")]
    DocumentCount(usize),

    #[error("document listed twice: {0}")]
    DuplicateDocument(String),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("no comparable fields found across {}", .documents.join(", "))]
    NoComparableFields { documents: Vec<String> },

    #[error("field pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record id: {0}")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
