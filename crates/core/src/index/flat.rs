use super::{check_dimensions, passes_filter, rank_order, DocumentFilter, IndexBackendKind, IndexHit, VectorIndex};
use crate::embeddings::{cosine_with_norms, vector_norm};
use crate::error::SearchError;
use crate::models::ChunkId;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Row-major matrix of vectors with cached norms and slot reuse.
pub struct FlatIndex {
    dimensions: usize,
    rows: Vec<f32>,
    norms: Vec<f64>,
    slots: Vec<Option<ChunkId>>,
    free: Vec<usize>,
    positions: HashMap<ChunkId, usize>,
}

// Heap entry whose ordering is rank order, so the heap top is the current
// worst hit and can be evicted.
struct Ranked(IndexHit);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(&self.0, &other.0)
    }
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            rows: Vec::new(),
            norms: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimensions;
        &self.rows[start..start + self.dimensions]
    }

    fn write_row(&mut self, slot: usize, vector: &[f32]) {
        let start = slot * self.dimensions;
        self.rows[start..start + self.dimensions].copy_from_slice(vector);
        self.norms[slot] = vector_norm(vector);
    }

    fn allocate_slot(&mut self) -> usize {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.rows.resize(self.rows.len() + self.dimensions, 0.0);
        self.norms.push(0.0);
        self.slots.push(None);
        self.slots.len() - 1
    }
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> IndexBackendKind {
        IndexBackendKind::Flat
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.positions.len()
    }

    fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.positions.contains_key(chunk_id)
    }

    fn chunk_ids(&self, document_id: &str) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self
            .positions
            .keys()
            .filter(|id| id.document_id == document_id)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn upsert(&mut self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<(), SearchError> {
        check_dimensions(self.dimensions, &vector)?;
        let slot = match self.positions.get(&chunk_id) {
            Some(slot) => *slot,
            None => {
                let slot = self.allocate_slot();
                self.slots[slot] = Some(chunk_id.clone());
                self.positions.insert(chunk_id, slot);
                slot
            }
        };
        self.write_row(slot, &vector);
        Ok(())
    }

    fn remove(&mut self, chunk_id: &ChunkId) -> bool {
        match self.positions.remove(chunk_id) {
            Some(slot) => {
                self.slots[slot] = None;
                self.norms[slot] = 0.0;
                self.free.push(slot);
                true
            }
            None => false,
        }
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<IndexHit>, SearchError> {
        check_dimensions(self.dimensions, query)?;
        let limit = top_k.min(self.positions.len());
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_norm = vector_norm(query);
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(limit + 1);

        for (slot, occupant) in self.slots.iter().enumerate() {
            let Some(chunk_id) = occupant else {
                continue;
            };
            if !passes_filter(chunk_id, filter) {
                continue;
            }

            let score = cosine_with_norms(query, query_norm, self.row(slot), self.norms[slot]);
            let candidate = Ranked(IndexHit {
                chunk_id: chunk_id.clone(),
                score,
            });

            if heap.len() < limit {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        Ok(heap.into_sorted_vec().into_iter().map(|ranked| ranked.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::Lcg;
    use crate::index::BruteForceIndex;

    fn filled_pair(count: u32, dimensions: usize, seed: u64) -> Result<(FlatIndex, BruteForceIndex), SearchError> {
        let mut rng = Lcg(seed);
        let mut flat = FlatIndex::new(dimensions);
        let mut brute = BruteForceIndex::new(dimensions);
        for sequence in 0..count {
            let document_id = format!("doc-{}", sequence % 4);
            let vector = rng.vector(dimensions);
            flat.upsert(ChunkId::new(&document_id, sequence), vector.clone())?;
            brute.upsert(ChunkId::new(&document_id, sequence), vector)?;
        }
        Ok((flat, brute))
    }

    #[test]
    fn ranking_matches_brute_force() -> Result<(), SearchError> {
        for seed in [1u64, 7, 42, 1234] {
            let (flat, brute) = filled_pair(200, 16, seed)?;
            let mut rng = Lcg(seed ^ 0xdead_beef);
            for top_k in [1usize, 5, 10, 50, 500] {
                let query = rng.vector(16);
                let expected = brute.search(&query, top_k, None)?;
                let actual = flat.search(&query, top_k, None)?;
                assert_eq!(actual.len(), expected.len());
                for (left, right) in actual.iter().zip(&expected) {
                    assert_eq!(left.chunk_id, right.chunk_id);
                    assert!((left.score - right.score).abs() <= 1e-6);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn ranking_matches_brute_force_with_ties_and_filters() -> Result<(), SearchError> {
        let mut flat = FlatIndex::new(2);
        let mut brute = BruteForceIndex::new(2);
        for sequence in 0..6u32 {
            for document_id in ["b", "a", "c"] {
                let vector = vec![1.0, (sequence % 2) as f32];
                flat.upsert(ChunkId::new(document_id, sequence), vector.clone())?;
                brute.upsert(ChunkId::new(document_id, sequence), vector)?;
            }
        }
        let filter: DocumentFilter = ["a".to_string(), "c".to_string()].into_iter().collect();
        for filter in [None, Some(&filter)] {
            let expected = brute.search(&[1.0, 0.0], 7, filter)?;
            let actual = flat.search(&[1.0, 0.0], 7, filter)?;
            assert_eq!(actual, expected);
        }
        Ok(())
    }

    #[test]
    fn removed_slots_are_reused_and_skipped() -> Result<(), SearchError> {
        let (mut flat, mut brute) = filled_pair(20, 8, 99)?;
        for sequence in (0..20).step_by(3) {
            let chunk_id = ChunkId::new(format!("doc-{}", sequence % 4), sequence);
            assert!(flat.remove(&chunk_id));
            assert!(brute.remove(&chunk_id));
        }
        assert!(!flat.remove(&ChunkId::new("doc-0", 0)));

        let mut rng = Lcg(5);
        let replacement = rng.vector(8);
        flat.upsert(ChunkId::new("new", 0), replacement.clone())?;
        brute.upsert(ChunkId::new("new", 0), replacement.clone())?;
        assert_eq!(flat.len(), brute.len());

        let expected = brute.search(&replacement, 100, None)?;
        let actual = flat.search(&replacement, 100, None)?;
        assert_eq!(actual, expected);
        assert_eq!(actual[0].chunk_id, ChunkId::new("new", 0));
        Ok(())
    }

    #[test]
    fn empty_index_and_zero_k_return_nothing() -> Result<(), SearchError> {
        let flat = FlatIndex::new(4);
        assert!(flat.search(&[0.0; 4], 10, None)?.is_empty());
        let (flat, _) = filled_pair(3, 4, 3)?;
        assert!(flat.search(&[1.0, 0.0, 0.0, 0.0], 0, None)?.is_empty());
        assert_eq!(flat.search(&[1.0, 0.0, 0.0, 0.0], 10, None)?.len(), 3);
        Ok(())
    }
}
