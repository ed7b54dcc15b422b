//! Deterministic text vectors via the hashing trick.
//!
//! Every alphanumeric token (and, optionally, every adjacent token pair) is
//! hashed into one of `dimensions` buckets with a sign taken from a second,
//! independent hash; the bucket counts are then L2-normalised. Cosine
//! similarity between two such vectors tracks lexical overlap. It is not a
//! semantic model: synonyms and paraphrases score as unrelated text.

use crate::chunking::token_texts;
use serde::{Deserialize, Serialize};

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const SIGN_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub use_bigrams: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            use_bigrams: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
    pub use_bigrams: bool,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::from(EmbeddingConfig::default())
    }
}

impl From<EmbeddingConfig> for HashingEmbedder {
    fn from(value: EmbeddingConfig) -> Self {
        Self {
            dimensions: value.dimensions.max(1),
            use_bigrams: value.use_bigrams,
        }
    }
}

impl HashingEmbedder {
    fn accumulate(&self, vector: &mut [f64], feature: &[u8]) {
        let bucket_hash = fnv1a(FNV_OFFSET, feature);
        let sign_hash = mix(fnv1a(FNV_OFFSET ^ SIGN_SALT, feature));
        let bucket = (bucket_hash % vector.len() as u64) as usize;
        if sign_hash >> 63 == 0 {
            vector[bucket] += 1.0;
        } else {
            vector[bucket] -= 1.0;
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f64; self.dimensions.max(1)];
        let terms: Vec<String> = token_texts(text)
            .filter(|token| token.chars().any(char::is_alphanumeric))
            .map(str::to_lowercase)
            .collect();

        for term in &terms {
            self.accumulate(&mut vector, term.as_bytes());
        }

        if self.use_bigrams {
            for pair in terms.windows(2) {
                let feature = format!("{}\u{1f}{}", pair[0], pair[1]);
                self.accumulate(&mut vector, feature.as_bytes());
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f64>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector.into_iter().map(|value| value as f32).collect()
    }
}

fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// splitmix64 finaliser; decorrelates the sign hash from the bucket hash.
fn mix(mut value: u64) -> u64 {
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    value ^ (value >> 31)
}

pub fn vector_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt()
}

/// Cosine from precomputed norms. Zero vectors score 0 against everything.
pub fn cosine_with_norms(left: &[f32], left_norm: f64, right: &[f32], right_norm: f64) -> f32 {
    if left.len() != right.len() || left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    let dot = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum::<f64>();
    (dot / (left_norm * right_norm)).clamp(-1.0, 1.0) as f32
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    cosine_with_norms(left, vector_norm(left), right, vector_norm(right))
}
