//! Nearest-neighbour index over chunk vectors.
//!
//! Two backends implement [`VectorIndex`]: [`BruteForceIndex`] scores every
//! stored vector and defines the reference ranking; [`FlatIndex`] keeps rows in
//! one contiguous matrix and selects top-k with a bounded heap. Both score with
//! [`cosine_with_norms`](crate::embeddings::cosine_with_norms) and order hits
//! with [`rank_order`], so they return identical results for identical input.

pub mod brute_force;
#[cfg(feature = "flat-index")]
pub mod flat;

pub use brute_force::BruteForceIndex;
#[cfg(feature = "flat-index")]
pub use flat::FlatIndex;

use crate::error::SearchError;
use crate::models::ChunkId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub type DocumentFilter = BTreeSet<String>;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// Descending score, then lower chunk sequence, then lower document id.
pub fn rank_order(left: &IndexHit, right: &IndexHit) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| left.chunk_id.cmp(&right.chunk_id))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    #[default]
    Auto,
    Flat,
    BruteForce,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackendKind,
}

pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> IndexBackendKind;

    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, chunk_id: &ChunkId) -> bool;

    fn chunk_ids(&self, document_id: &str) -> Vec<ChunkId>;

    fn upsert(&mut self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<(), SearchError>;

    fn remove(&mut self, chunk_id: &ChunkId) -> bool;

    /// `top_k` is clamped to the number of candidates; an empty index yields
    /// an empty list.
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<IndexHit>, SearchError>;
}

pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), SearchError> {
    if vector.len() != expected {
        return Err(SearchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn passes_filter(chunk_id: &ChunkId, filter: Option<&DocumentFilter>) -> bool {
    filter.map_or(true, |allowed| allowed.contains(&chunk_id.document_id))
}

/// Picks the backend once, at startup.
pub fn select_backend(kind: IndexBackendKind, dimensions: usize) -> Box<dyn VectorIndex> {
    match kind {
        IndexBackendKind::BruteForce => Box::new(BruteForceIndex::new(dimensions)),
        IndexBackendKind::Auto | IndexBackendKind::Flat => flat_or_fallback(kind, dimensions),
    }
}

#[cfg(feature = "flat-index")]
fn flat_or_fallback(_kind: IndexBackendKind, dimensions: usize) -> Box<dyn VectorIndex> {
    Box::new(FlatIndex::new(dimensions))
}

#[cfg(not(feature = "flat-index"))]
fn flat_or_fallback(kind: IndexBackendKind, dimensions: usize) -> Box<dyn VectorIndex> {
    if kind == IndexBackendKind::Flat {
        tracing::warn!("flat index requested but not compiled in; using brute-force scan");
    }
    Box::new(BruteForceIndex::new(dimensions))
}

/// The process-wide index: one owned backend behind a reader-writer lock.
///
/// Searches share the read lock. Every mutation validates its input before
/// taking the write lock, so a searcher sees either the old or the new state.
pub struct SharedIndex {
    inner: RwLock<Box<dyn VectorIndex>>,
}

impl SharedIndex {
    pub fn new(index: Box<dyn VectorIndex>) -> Self {
        Self {
            inner: RwLock::new(index),
        }
    }

    pub fn backend(&self) -> IndexBackendKind {
        self.read(|index| index.backend())
    }

    pub fn dimensions(&self) -> usize {
        self.read(|index| index.dimensions())
    }

    pub fn len(&self) -> usize {
        self.read(|index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.read(|index| index.contains(chunk_id))
    }

    pub fn upsert(&self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<(), SearchError> {
        check_dimensions(self.dimensions(), &vector)?;
        self.write(|index| index.upsert(chunk_id, vector))
    }

    pub fn remove(&self, chunk_id: &ChunkId) -> bool {
        self.write(|index| index.remove(chunk_id))
    }

    /// Swaps every vector of one document in a single critical section.
    pub fn replace_document(
        &self,
        document_id: &str,
        entries: Vec<(ChunkId, Vec<f32>)>,
    ) -> Result<usize, SearchError> {
        let dimensions = self.dimensions();
        for (chunk_id, vector) in &entries {
            check_dimensions(dimensions, vector)?;
            if chunk_id.document_id != document_id {
                return Err(SearchError::IndexOutOfSync {
                    chunk_id: chunk_id.to_string(),
                });
            }
        }

        self.write(|index| {
            let stale = index.chunk_ids(document_id);
            for chunk_id in &stale {
                index.remove(chunk_id);
            }
            for (chunk_id, vector) in entries {
                index.upsert(chunk_id, vector)?;
            }
            debug!(document_id, removed = stale.len(), "replaced document vectors");
            Ok(stale.len())
        })
    }

    pub fn remove_document(&self, document_id: &str) -> usize {
        self.write(|index| {
            let stale = index.chunk_ids(document_id);
            for chunk_id in &stale {
                index.remove(chunk_id);
            }
            stale.len()
        })
    }

    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<IndexHit>, SearchError> {
        self.read(|index| index.search(query, top_k, filter))
    }

    // Mutations are validated up front, so a poisoned lock still guards a
    // consistent index.
    fn read<T>(&self, op: impl FnOnce(&(dyn VectorIndex + 'static)) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        op(&**guard)
    }

    fn write<T>(&self, op: impl FnOnce(&mut (dyn VectorIndex + 'static)) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        op(&mut **guard)
    }
}
