//! File-backed [`DocumentStore`]: one pretty-printed JSON file per record.
//!
//! ```text
//! <root>/documents/<document_id>.json
//! <root>/reports/<report_id>.json
//! <root>/mismatches/<mismatch_id>.json
//! ```

use super::DocumentStore;
use crate::compare::{ComparisonReport, Mismatch};
use crate::error::StoreError;
use crate::models::StoredDocument;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const DOCUMENTS_DIR: &str = "documents";
const REPORTS_DIR: &str = "reports";
const MISMATCHES_DIR: &str = "mismatches";

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [DOCUMENTS_DIR, REPORTS_DIR, MISMATCHES_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self { root })
    }

    fn record_path(&self, dir: &str, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(dir).join(format!("{id}.json")))
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes).await?;
    fs::rename(&staging, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn remove_file(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn put_document(&self, document: &StoredDocument) -> Result<(), StoreError> {
        let path = self.record_path(DOCUMENTS_DIR, &document.document.id)?;
        write_json(&path, document).await
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let path = self.record_path(DOCUMENTS_DIR, document_id)?;
        read_json(&path).await
    }

    async fn load_documents(&self) -> Result<Vec<StoredDocument>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(self.root.join(DOCUMENTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(document) = read_json::<StoredDocument>(&path).await? {
                documents.push(document);
            }
        }
        documents.sort_by(|left, right| left.document.id.cmp(&right.document.id));
        Ok(documents)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(DOCUMENTS_DIR, document_id)?;
        remove_file(&path).await
    }

    async fn put_report(&self, report: &ComparisonReport) -> Result<(), StoreError> {
        for mismatch in &report.mismatches {
            let path = self.record_path(MISMATCHES_DIR, &mismatch.id)?;
            write_json(&path, mismatch).await?;
        }
        let path = self.record_path(REPORTS_DIR, &report.report_id)?;
        write_json(&path, report).await
    }

    async fn get_report(&self, report_id: &str) -> Result<Option<ComparisonReport>, StoreError> {
        let path = self.record_path(REPORTS_DIR, report_id)?;
        read_json(&path).await
    }

    async fn get_mismatch(&self, mismatch_id: &str) -> Result<Option<Mismatch>, StoreError> {
        let path = self.record_path(MISMATCHES_DIR, mismatch_id)?;
        read_json(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{build_chunks, chunk_fragments, ChunkingConfig};
    use crate::compare::{DocumentValue, MismatchKind, Severity};
    use crate::models::{Document, Location, LocationKind, SourceFormat, TextFragment};
    use chrono::Utc;
    use tempfile::tempdir;

    fn stored(id: &str, text: &str) -> Result<StoredDocument, Box<dyn std::error::Error>> {
        let fragments = vec![TextFragment {
            text: text.to_string(),
            location: Location::at(LocationKind::Line, 1),
        }];
        let chunked = chunk_fragments(&fragments, &ChunkingConfig::default())?;
        let mut chunks = build_chunks(id, &chunked);
        for chunk in &mut chunks {
            chunk.embedding = Some(vec![0.25, -0.5, 1.0 / 3.0]);
        }
        Ok(StoredDocument {
            document: Document {
                id: id.to_string(),
                filename: format!("{id}.txt"),
                source_format: SourceFormat::Txt,
                checksum: "checksum".to_string(),
                ingested_at: Utc::now(),
                fragment_count: 1,
                warnings: Vec::new(),
            },
            fragments: chunked.fragments,
            chunks,
        })
    }

    #[tokio::test]
    async fn documents_round_trip_with_exact_embeddings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::open(dir.path()).await?;
        let document = stored("b0c1", "Drawing 100 Rev D")?;

        store.put_document(&document).await?;
        let loaded = store.get_document("b0c1").await?.ok_or("document missing")?;

        assert_eq!(loaded.chunks, document.chunks);
        assert_eq!(loaded.text(), "Drawing 100 Rev D");
        assert!(store.get_document("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn documents_survive_reopen_and_delete() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let store = JsonFileStore::open(dir.path()).await?;
            store.put_document(&stored("bbbb", "second")?).await?;
            store.put_document(&stored("aaaa", "first")?).await?;
        }

        let store = JsonFileStore::open(dir.path()).await?;
        let ids: Vec<String> = store
            .list_documents()
            .await?
            .into_iter()
            .map(|document| document.id)
            .collect();
        assert_eq!(ids, vec!["aaaa", "bbbb"]);

        assert!(store.delete_document("aaaa").await?);
        assert!(!store.delete_document("aaaa").await?);
        assert_eq!(store.load_documents().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reports_and_mismatches_are_addressable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::open(dir.path()).await?;
        let location = Location::at(LocationKind::Paragraph, 2);
        let value = |document_id: &str, value: &str| DocumentValue {
            document_id: document_id.to_string(),
            filename: format!("{document_id}.docx"),
            value: value.to_string(),
            raw_match_text: format!("Rev {value}"),
            unit: None,
            context: "Drawing 100".to_string(),
            location,
            line: 1,
        };
        let report = ComparisonReport {
            report_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            documents: Vec::new(),
            aligned_groups: 1,
            mismatches: vec![Mismatch {
                id: "f00d".to_string(),
                kind: MismatchKind::RevisionMismatch,
                field: "Revision tag (drawing 100)".to_string(),
                context: "drawing 100".to_string(),
                values_by_document: vec![value("a", "D"), value("b", "E")],
                severity: Severity::High,
                delta: None,
            }],
        };

        store.put_report(&report).await?;

        let loaded = store
            .get_report(&report.report_id)
            .await?
            .ok_or("report missing")?;
        assert_eq!(loaded.mismatches, report.mismatches);
        let mismatch = store.get_mismatch("f00d").await?.ok_or("mismatch missing")?;
        assert_eq!(mismatch.values_by_document[1].value, "E");
        Ok(())
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::open(dir.path()).await?;
        assert!(matches!(
            store.get_document("../escape").await,
            Err(StoreError::InvalidId(_))
        ));
        Ok(())
    }
}
