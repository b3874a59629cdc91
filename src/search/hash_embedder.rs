//! FNV-1a feature hashing embedder.
//!
//! Lexical, deterministic and always available. Each lowercase alphanumeric
//! token (and each adjacent token pair) is hashed into one of `dimension`
//! buckets with a sign bit; the result is L2-normalized.

use super::embedder::{Embedder, EmbedderError, EmbedderResult};

pub const HASH_EMBEDDER_ID: &str = "fnv1a-384";
pub const HASH_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: HASH_DIMENSION,
        }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bump(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let h = fnv1a(feature.as_bytes());
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |acc, b| {
        (acc ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbedderError::InvalidInput("empty text".to_string()));
        }
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.bump(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.bump(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        HASH_EMBEDDER_ID
    }

    fn is_semantic(&self) -> bool {
        false
    }
}
