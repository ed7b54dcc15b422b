use super::{check_dimensions, passes_filter, rank_order, DocumentFilter, IndexBackendKind, IndexHit, VectorIndex};
use crate::embeddings::{cosine_with_norms, vector_norm};
use crate::error::SearchError;
use crate::models::ChunkId;
use std::collections::HashMap;

struct StoredVector {
    vector: Vec<f32>,
    norm: f64,
}

/// Linear scan over every stored vector. This is the reference ranking.
pub struct BruteForceIndex {
    dimensions: usize,
    vectors: HashMap<ChunkId, StoredVector>,
}

impl BruteForceIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: HashMap::new(),
        }
    }
}

impl VectorIndex for BruteForceIndex {
    fn backend(&self) -> IndexBackendKind {
        IndexBackendKind::BruteForce
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.vectors.contains_key(chunk_id)
    }

    fn chunk_ids(&self, document_id: &str) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self
            .vectors
            .keys()
            .filter(|id| id.document_id == document_id)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn upsert(&mut self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<(), SearchError> {
        check_dimensions(self.dimensions, &vector)?;
        let norm = vector_norm(&vector);
        self.vectors.insert(chunk_id, StoredVector { vector, norm });
        Ok(())
    }

    fn remove(&mut self, chunk_id: &ChunkId) -> bool {
        self.vectors.remove(chunk_id).is_some()
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<IndexHit>, SearchError> {
        check_dimensions(self.dimensions, query)?;
        let query_norm = vector_norm(query);

        let mut hits: Vec<IndexHit> = self
            .vectors
            .iter()
            .filter(|(chunk_id, _)| passes_filter(chunk_id, filter))
            .map(|(chunk_id, stored)| IndexHit {
                chunk_id: chunk_id.clone(),
                score: cosine_with_norms(query, query_norm, &stored.vector, stored.norm),
            })
            .collect();

        hits.sort_by(rank_order);
        hits.truncate(top_k);
        Ok(hits)
    }
}
