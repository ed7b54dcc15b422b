pub mod json;
pub mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::compare::{ComparisonReport, Mismatch};
use crate::error::StoreError;
use crate::models::{Document, StoredDocument};
use async_trait::async_trait;

/// Persistence seam for documents, their chunks and comparison reports.
///
/// Records are addressed by stable ids: documents by document id, reports by
/// report id and individual mismatches by mismatch id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces the document and all of its chunks.
    async fn put_document(&self, document: &StoredDocument) -> Result<(), StoreError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// All documents with chunks, ordered by document id.
    async fn load_documents(&self) -> Result<Vec<StoredDocument>, StoreError>;

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .load_documents()
            .await?
            .into_iter()
            .map(|stored| stored.document)
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError>;

    async fn put_report(&self, report: &ComparisonReport) -> Result<(), StoreError>;

    async fn get_report(&self, report_id: &str) -> Result<Option<ComparisonReport>, StoreError>;

    async fn get_mismatch(&self, mismatch_id: &str) -> Result<Option<Mismatch>, StoreError>;
}
