pub mod chunking;
pub mod compare;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use chunking::{build_chunks, chunk_fragments, reconstruct_text, tokenize, ChunkingConfig};
pub use compare::{
    Comparator, CompareConfig, ComparedDocument, ComparisonField, ComparisonReport, DocumentValue,
    FieldGroup, FieldKind, Mismatch, MismatchKind, Severity,
};
pub use config::{PipelineConfig, SearchConfig};
pub use embeddings::{
    cosine_similarity, Embedder, EmbeddingConfig, HashingEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    CompareError, ConfigError, ExtractionWarning, IngestError, SearchError, StoreError,
};
pub use extractor::{extract, extract_named, Extraction, TextExtractor};
pub use index::{
    select_backend, BruteForceIndex, DocumentFilter, IndexBackendKind, IndexConfig, IndexHit,
    SharedIndex, VectorIndex,
};
#[cfg(feature = "flat-index")]
pub use index::FlatIndex;
pub use ingest::{prepare_document, IngestOutcome, IngestionReport, SkippedFile};
pub use models::{
    Chunk, ChunkId, Citation, Document, Location, LocationKind, SearchQuery, SearchResult,
    SourceFormat, StoredDocument, TextFragment,
};
pub use orchestrator::SearchCoordinator;
pub use store::{DocumentStore, JsonFileStore, MemoryStore};
