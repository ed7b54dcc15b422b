use crate::chunking::normalize_whitespace;
use crate::compare::{ComparedDocument, Comparator, ComparisonReport, Mismatch};
use crate::config::PipelineConfig;
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::error::{CompareError, ConfigError, IngestError, SearchError, StoreError};
use crate::index::{select_backend, IndexBackendKind, SharedIndex};
use crate::ingest::{
    discover_documents, file_name_of, prepare_document, IngestOutcome, IngestionReport, SkippedFile,
};
use crate::models::{ChunkId, Citation, Document, SearchQuery, SearchResult, StoredDocument};
use crate::store::DocumentStore;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// In-process entry points: ingestion, search, comparison and lookups over
/// one document store and the vector index built from it.
pub struct SearchCoordinator<S: DocumentStore> {
    store: S,
    index: SharedIndex,
    embedder: HashingEmbedder,
    comparator: Comparator,
    config: PipelineConfig,
    // Held for writing while a document's store record and vectors change
    // together, and for reading while a search joins hits back to records.
    commit: RwLock<()>,
}

impl<S: DocumentStore> SearchCoordinator<S> {
    /// Validates `config`, picks the index backend and rebuilds the index
    /// from every stored chunk.
    pub async fn open(store: S, config: PipelineConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let embedder = HashingEmbedder::from(config.embedding);
        let index = SharedIndex::new(select_backend(config.index.backend, embedder.dimensions()));
        let comparator = Comparator::new(config.compare)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let documents = store.load_documents().await?;
        for stored in &documents {
            index.replace_document(&stored.document.id, chunk_vectors(stored)?)?;
        }
        info!(
            documents = documents.len(),
            vectors = index.len(),
            backend = ?index.backend(),
            "vector index rebuilt"
        );

        Ok(Self {
            store,
            index,
            embedder,
            comparator,
            config,
            commit: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> IndexBackendKind {
        self.index.backend()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Ingests one file's bytes. Re-ingesting the same name and content
    /// replaces the earlier copy.
    pub async fn ingest_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestOutcome, IngestError> {
        let config = self.config;
        let embedder = self.embedder;
        let name = filename.to_string();
        let stored = tokio::task::spawn_blocking(move || prepare_document(&name, &bytes, &config, &embedder))
            .await
            .map_err(|error| IngestError::Worker(error.to_string()))??;
        self.commit_document(stored).await
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let filename = file_name_of(path)?;
        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(&filename, bytes).await
    }

    /// Best-effort batch over every supported file below `folder`. Files are
    /// extracted concurrently and committed in path order; extraction and
    /// store failures are recorded as skips.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported documents found in {}",
                folder.display()
            )));
        }

        let mut workers = JoinSet::new();
        for path in files {
            let config = self.config;
            let embedder = self.embedder;
            workers.spawn(async move {
                let prepared = prepare_path(&path, config, embedder).await;
                (path, prepared)
            });
        }

        let mut prepared: Vec<(PathBuf, Result<StoredDocument, IngestError>)> = Vec::new();
        while let Some(joined) = workers.join_next().await {
            prepared.push(joined.map_err(|error| IngestError::Worker(error.to_string()))?);
        }
        prepared.sort_by(|left, right| left.0.cmp(&right.0));

        let mut report = IngestionReport::default();
        for (path, result) in prepared {
            let committed = match result {
                Ok(stored) => self.commit_document(stored).await,
                Err(error) => Err(error),
            };
            match committed {
                Ok(outcome) => report.ingested.push(outcome),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping document");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            folder = %folder.display(),
            "folder ingestion finished"
        );
        Ok(report)
    }

    async fn commit_document(&self, stored: StoredDocument) -> Result<IngestOutcome, IngestError> {
        let vectors = chunk_vectors(&stored)?;
        let document_id = stored.document.id.clone();

        let _guard = self.commit.write().await;
        let replaced = self.store.get_document(&document_id).await?.is_some();
        self.index.replace_document(&document_id, vectors)?;
        if let Err(error) = self.store.put_document(&stored).await {
            // Same id means same content, so a replaced document's vectors
            // are already correct; only a new one must be withdrawn.
            if !replaced {
                self.index.remove_document(&document_id);
            }
            return Err(error.into());
        }

        for warning in &stored.document.warnings {
            warn!(document = %stored.document.filename, warning = %warning, "ingested with warning");
        }
        info!(
            document = %stored.document.filename,
            document_id = %document_id,
            chunks = stored.chunks.len(),
            replaced,
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id,
            filename: stored.document.filename,
            chunk_count: stored.chunks.len(),
            replaced,
            warnings: stored.document.warnings,
        })
    }

    /// Removes a document's chunks from the index and the store.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let _guard = self.commit.write().await;
        let removed_vectors = self.index.remove_document(document_id);
        let removed = self.store.delete_document(document_id).await?;
        if removed || removed_vectors > 0 {
            info!(document_id, vectors = removed_vectors, "document deleted");
        }
        Ok(removed)
    }

    /// Ranked chunks for a query. A blank query, an empty index or an empty
    /// document filter all yield an empty list.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        if query.document_filter.as_ref().is_some_and(|filter| filter.is_empty()) {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(&query.text);
        let _guard = self.commit.read().await;
        let hits = self
            .index
            .search(&query_vector, query.top_k, query.document_filter.as_ref())?;
        debug!(query = %query.text, top_k = query.top_k, hits = hits.len(), "index searched");

        let mut documents: HashMap<String, StoredDocument> = HashMap::new();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let out_of_sync = || SearchError::IndexOutOfSync {
                chunk_id: hit.chunk_id.to_string(),
            };
            let stored = match documents.entry(hit.chunk_id.document_id.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let loaded = self
                        .store
                        .get_document(&hit.chunk_id.document_id)
                        .await?
                        .ok_or_else(out_of_sync)?;
                    entry.insert(loaded)
                }
            };
            let chunk = stored.chunk(hit.chunk_id.sequence).ok_or_else(out_of_sync)?;

            results.push(SearchResult {
                snippet: snippet(&chunk.text, self.config.search.snippet_chars),
                citation: Citation {
                    document_id: stored.document.id.clone(),
                    filename: stored.document.filename.clone(),
                    location: chunk.location,
                },
                chunk_id: hit.chunk_id,
                score: hit.score,
            });
        }

        Ok(results)
    }

    /// Compares 2-3 stored documents and persists the resulting report.
    pub async fn compare(&self, document_ids: &[String]) -> Result<ComparisonReport, CompareError> {
        if !(2..=3).contains(&document_ids.len()) {
            return Err(CompareError::DocumentCount(document_ids.len()));
        }
        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            if !seen.insert(document_id.as_str()) {
                return Err(CompareError::DuplicateDocument(document_id.clone()));
            }
            let stored = self
                .store
                .get_document(document_id)
                .await?
                .ok_or_else(|| CompareError::UnknownDocument(document_id.clone()))?;
            documents.push(ComparedDocument::from(&stored));
        }

        let report = self.comparator.compare(&documents)?;
        self.store.put_report(&report).await?;
        info!(
            report_id = %report.report_id,
            documents = documents.len(),
            mismatches = report.mismatches.len(),
            "comparison finished"
        );
        Ok(report)
    }

    pub async fn document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.store.get_document(document_id).await
    }

    pub async fn documents(&self) -> Result<Vec<Document>, StoreError> {
        self.store.list_documents().await
    }

    pub async fn report(&self, report_id: &str) -> Result<Option<ComparisonReport>, StoreError> {
        self.store.get_report(report_id).await
    }

    pub async fn mismatch(&self, mismatch_id: &str) -> Result<Option<Mismatch>, StoreError> {
        self.store.get_mismatch(mismatch_id).await
    }
}

async fn prepare_path(
    path: &Path,
    config: PipelineConfig,
    embedder: HashingEmbedder,
) -> Result<StoredDocument, IngestError> {
    let filename = file_name_of(path)?;
    let bytes = tokio::fs::read(path).await?;
    tokio::task::spawn_blocking(move || prepare_document(&filename, &bytes, &config, &embedder))
        .await
        .map_err(|error| IngestError::Worker(error.to_string()))?
}

fn chunk_vectors(stored: &StoredDocument) -> Result<Vec<(ChunkId, Vec<f32>)>, SearchError> {
    stored
        .chunks
        .iter()
        .map(|chunk| {
            chunk
                .embedding
                .clone()
                .map(|vector| (chunk.id.clone(), vector))
                .ok_or_else(|| SearchError::IndexOutOfSync {
                    chunk_id: chunk.id.to_string(),
                })
        })
        .collect()
}

fn snippet(text: &str, limit: usize) -> String {
    let collapsed = normalize_whitespace(text);
    match collapsed.char_indices().nth(limit) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::compare::MismatchKind;
    use crate::store::{JsonFileStore, MemoryStore};
    use tempfile::tempdir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn small_chunks() -> PipelineConfig {
        PipelineConfig {
            chunking: ChunkingConfig {
                target_tokens: 12,
                overlap_ratio: 0.25,
            },
            ..PipelineConfig::default()
        }
    }

    async fn coordinator() -> Result<SearchCoordinator<MemoryStore>, SearchError> {
        SearchCoordinator::open(MemoryStore::new(), small_chunks()).await
    }

    const PUMP: &str = "Hydraulic pump maintenance\nCheck the hydraulic pump pressure weekly\nReplace seals on the pump housing";
    const BORE: &str = "Drawing 100 Rev D\nBore diameter 10 mm tolerance\n⌀10 ±0.002";

    #[tokio::test]
    async fn search_returns_cited_results_best_first() -> TestResult {
        let coordinator = coordinator().await?;
        let pump = coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
        coordinator.ingest_bytes("bore.txt", BORE.as_bytes().to_vec()).await?;

        let results = coordinator.search(&SearchQuery::new("hydraulic pump pressure", 3)).await?;

        assert!(!results.is_empty());
        assert_eq!(results[0].citation.document_id, pump.document_id);
        assert_eq!(results[0].citation.filename, "pump.txt");
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert!(results[0].snippet.chars().count() <= 240);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_blank_query_and_empty_filter_return_nothing() -> TestResult {
        let coordinator = coordinator().await?;
        assert!(coordinator.search(&SearchQuery::new("anything", 5)).await?.is_empty());

        coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
        assert!(coordinator.search(&SearchQuery::new("   ", 5)).await?.is_empty());
        let none: [&str; 0] = [];
        let filtered = SearchQuery::new("pump", 5).within(none);
        assert!(coordinator.search(&filtered).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn document_filter_restricts_results() -> TestResult {
        let coordinator = coordinator().await?;
        coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
        let bore = coordinator.ingest_bytes("bore.txt", BORE.as_bytes().to_vec()).await?;

        let query = SearchQuery::new("hydraulic pump", 10).within([bore.document_id.clone()]);
        let results = coordinator.search(&query).await?;
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|result| result.chunk_id.document_id == bore.document_id));
        Ok(())
    }

    #[tokio::test]
    async fn reingestion_replaces_without_duplicates() -> TestResult {
        let coordinator = coordinator().await?;
        let first = coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
        let indexed = coordinator.index_len();
        let second = coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;

        assert_eq!(first.document_id, second.document_id);
        assert!(!first.replaced);
        assert!(second.replaced);
        assert_eq!(coordinator.index_len(), indexed);
        assert_eq!(coordinator.documents().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_document_is_stored_with_warning_and_no_vectors() -> TestResult {
        let coordinator = coordinator().await?;
        let outcome = coordinator.ingest_bytes("blank.txt", b"\n \n".to_vec()).await?;
        assert_eq!(outcome.chunk_count, 0);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(coordinator.index_len(), 0);
        assert!(coordinator.document(&outcome.document_id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_store_record_and_vectors() -> TestResult {
        let coordinator = coordinator().await?;
        let pump = coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
        assert!(coordinator.index_len() > 0);

        assert!(coordinator.delete_document(&pump.document_id).await?);
        assert_eq!(coordinator.index_len(), 0);
        assert!(coordinator.search(&SearchQuery::new("pump", 5)).await?.is_empty());
        assert!(!coordinator.delete_document(&pump.document_id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn compare_persists_report_and_mismatches() -> TestResult {
        let coordinator = coordinator().await?;
        let a = coordinator
            .ingest_bytes("a.txt", "Drawing 100 Rev D\n⌀10 ±0.002".as_bytes().to_vec())
            .await?;
        let b = coordinator
            .ingest_bytes("b.txt", "Drawing 100 Rev E\n⌀10 ±0.0015".as_bytes().to_vec())
            .await?;

        let report = coordinator
            .compare(&[a.document_id.clone(), b.document_id.clone()])
            .await?;
        let kinds: Vec<MismatchKind> = report.mismatches.iter().map(|mismatch| mismatch.kind).collect();
        assert_eq!(kinds, vec![MismatchKind::RevisionMismatch, MismatchKind::ToleranceMismatch]);

        let stored = coordinator.report(&report.report_id).await?.ok_or("report missing")?;
        assert_eq!(stored.mismatches, report.mismatches);
        let mismatch = coordinator
            .mismatch(&report.mismatches[1].id)
            .await?
            .ok_or("mismatch missing")?;
        assert_eq!(mismatch.values_by_document[0].filename, "a.txt");
        Ok(())
    }

    #[tokio::test]
    async fn compare_rejects_unknown_and_miscounted_documents() -> TestResult {
        let coordinator = coordinator().await?;
        let a = coordinator.ingest_bytes("a.txt", b"Drawing 100 Rev D".to_vec()).await?;

        let unknown = coordinator.compare(&[a.document_id.clone(), "missing".to_string()]).await;
        assert!(matches!(unknown, Err(CompareError::UnknownDocument(id)) if id == "missing"));
        let single = coordinator.compare(&[a.document_id.clone()]).await;
        assert!(matches!(single, Err(CompareError::DocumentCount(1))));
        Ok(())
    }

    #[tokio::test]
    async fn reopening_a_json_store_rebuilds_the_index() -> TestResult {
        let dir = tempdir()?;
        let expected = {
            let coordinator = SearchCoordinator::open(JsonFileStore::open(dir.path()).await?, small_chunks()).await?;
            coordinator.ingest_bytes("pump.txt", PUMP.as_bytes().to_vec()).await?;
            coordinator.search(&SearchQuery::new("pump seals", 3)).await?
        };

        let reopened = SearchCoordinator::open(JsonFileStore::open(dir.path()).await?, small_chunks()).await?;
        let actual = reopened.search(&SearchQuery::new("pump seals", 3)).await?;
        assert_eq!(actual, expected);
        Ok(())
    }

    #[tokio::test]
    async fn stored_chunk_without_embedding_is_out_of_sync() -> TestResult {
        let store = MemoryStore::new();
        let embedder = HashingEmbedder::default();
        let mut stored = prepare_document("pump.txt", PUMP.as_bytes(), &PipelineConfig::default(), &embedder)?;
        stored.chunks[0].embedding = None;
        store.put_document(&stored).await?;

        let opened = SearchCoordinator::open(store, PipelineConfig::default()).await;
        assert!(matches!(opened, Err(SearchError::IndexOutOfSync { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_is_best_effort() -> TestResult {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("pump.txt"), PUMP)?;
        std::fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        std::fs::write(dir.path().join("ignored.bin"), b"\x00\x01")?;

        let coordinator = coordinator().await?;
        let report = coordinator.ingest_folder(dir.path()).await?;

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].filename, "pump.txt");
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.pdf"));

        let empty = tempdir()?;
        assert!(matches!(
            coordinator.ingest_folder(empty.path()).await,
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }

    /// Memory store that refuses to write one filename.
    struct ReadOnlyFor {
        inner: MemoryStore,
        filename: &'static str,
    }

    #[async_trait::async_trait]
    impl DocumentStore for ReadOnlyFor {
        async fn put_document(&self, document: &StoredDocument) -> Result<(), StoreError> {
            if document.document.filename == self.filename {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only volume",
                )));
            }
            self.inner.put_document(document).await
        }

        async fn get_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
            self.inner.get_document(document_id).await
        }

        async fn load_documents(&self) -> Result<Vec<StoredDocument>, StoreError> {
            self.inner.load_documents().await
        }

        async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
            self.inner.delete_document(document_id).await
        }

        async fn put_report(&self, report: &ComparisonReport) -> Result<(), StoreError> {
            self.inner.put_report(report).await
        }

        async fn get_report(&self, report_id: &str) -> Result<Option<ComparisonReport>, StoreError> {
            self.inner.get_report(report_id).await
        }

        async fn get_mismatch(&self, mismatch_id: &str) -> Result<Option<Mismatch>, StoreError> {
            self.inner.get_mismatch(mismatch_id).await
        }
    }

    #[tokio::test]
    async fn folder_ingestion_skips_documents_the_store_rejects() -> TestResult {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a_pump.txt"), PUMP)?;
        std::fs::write(dir.path().join("b_locked.txt"), BORE)?;
        std::fs::write(dir.path().join("c_notes.txt"), "Inspection notes for the pump bay")?;

        let store = ReadOnlyFor {
            inner: MemoryStore::new(),
            filename: "b_locked.txt",
        };
        let coordinator = SearchCoordinator::open(store, small_chunks()).await?;
        let report = coordinator.ingest_folder(dir.path()).await?;

        let ingested: Vec<&str> = report.ingested.iter().map(|outcome| outcome.filename.as_str()).collect();
        assert_eq!(ingested, vec!["a_pump.txt", "c_notes.txt"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("b_locked.txt"));
        assert!(report.skipped[0].reason.contains("read-only volume"));

        let results = coordinator.search(&SearchQuery::new("drawing bore tolerance", 50)).await?;
        assert!(results
            .iter()
            .all(|result| result.citation.filename != "b_locked.txt"));
        assert_eq!(coordinator.documents().await?.len(), 2);
        Ok(())
    }

    #[test]
    fn snippet_collapses_whitespace_and_truncates_on_chars() {
        assert_eq!(snippet("a  b\n c", 10), "a b c");
        assert_eq!(snippet("⌀10 ±0.002", 4), "⌀10 ");
    }
}
