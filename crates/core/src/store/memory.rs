//! In-process [`DocumentStore`] used by tests and short-lived sessions.

use super::DocumentStore;
use crate::compare::{ComparisonReport, Mismatch};
use crate::error::StoreError;
use crate::models::StoredDocument;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<String, StoredDocument>>,
    reports: RwLock<HashMap<String, ComparisonReport>>,
    mismatches: RwLock<HashMap<String, Mismatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put_document(&self, document: &StoredDocument) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert(document.document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn load_documents(&self) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self.documents.read().await.values().cloned().collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool, StoreError> {
        Ok(self.documents.write().await.remove(document_id).is_some())
    }

    async fn put_report(&self, report: &ComparisonReport) -> Result<(), StoreError> {
        {
            let mut mismatches = self.mismatches.write().await;
            for mismatch in &report.mismatches {
                mismatches.insert(mismatch.id.clone(), mismatch.clone());
            }
        }
        self.reports
            .write()
            .await
            .insert(report.report_id.clone(), report.clone());
        Ok(())
    }

    async fn get_report(&self, report_id: &str) -> Result<Option<ComparisonReport>, StoreError> {
        Ok(self.reports.read().await.get(report_id).cloned())
    }

    async fn get_mismatch(&self, mismatch_id: &str) -> Result<Option<Mismatch>, StoreError> {
        Ok(self.mismatches.read().await.get(mismatch_id).cloned())
    }
}
