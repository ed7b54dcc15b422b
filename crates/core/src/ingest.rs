use crate::chunking::{build_chunks, chunk_fragments};
use crate::config::PipelineConfig;
use crate::embeddings::Embedder;
use crate::error::{ExtractionWarning, IngestError};
use crate::extractor::extract;
use crate::models::{Document, SourceFormat, StoredDocument};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supported documents under `folder`, recursively, in path order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(SourceFormat::from_extension)
            .is_some();

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable id: the same name with the same content always maps to the same
/// document, so re-ingesting it replaces rather than duplicates.
pub fn generate_document_id(filename: &str, checksum: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0]);
    hasher.update(checksum.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn file_name_of(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Extract, chunk and embed one document. Pure computation: nothing is
/// stored or indexed here.
pub fn prepare_document<E: Embedder + ?Sized>(
    filename: &str,
    bytes: &[u8],
    config: &PipelineConfig,
    embedder: &E,
) -> Result<StoredDocument, IngestError> {
    let format = SourceFormat::from_filename(filename)
        .ok_or_else(|| IngestError::UnsupportedFormat(filename.to_string()))?;
    let extraction = extract(bytes, format)?;
    let chunked = chunk_fragments(&extraction.fragments, &config.chunking)?;

    let checksum = digest_bytes(bytes);
    let document_id = generate_document_id(filename, &checksum);
    let mut chunks = build_chunks(&document_id, &chunked);
    for chunk in &mut chunks {
        chunk.embedding = Some(embedder.embed(&chunk.text));
    }

    Ok(StoredDocument {
        document: Document {
            id: document_id,
            filename: filename.to_string(),
            source_format: format,
            checksum,
            ingested_at: Utc::now(),
            fragment_count: extraction.fragments.len(),
            warnings: extraction.warning.into_iter().collect(),
        },
        fragments: chunked.fragments,
        chunks,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
    /// An earlier copy with the same id was replaced.
    pub replaced: bool,
    pub warnings: Vec<ExtractionWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of a best-effort batch: files that made it and files that did not.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionReport {
    pub ingested: Vec<IngestOutcome>,
    pub skipped: Vec<SkippedFile>,
}
