//! The `Embedder` capability: swappable text-to-vector backend so cache
//! persistence can be keyed by model identifier and tests can avoid the ONNX
//! runtime entirely.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::Arc;

pub const EMBEDDING_DIMENSION: usize = 384;

/// A named, swappable embedding backend. `model_id` feeds the cache's
/// `configHash` so switching embedders invalidates stale vectors.
#[cfg_attr(test, mockall::automock)]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder produced no output for a single input"))
    }
}

/// Local ONNX-backed embedder: `all-MiniLM-L6-v2` via `fastembed`, 384 dims.
pub struct FastEmbedder {
    model: Mutex<fastembed::TextEmbedding>,
}

impl FastEmbedder {
    pub fn try_new() -> Result<Self> {
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("failed to initialize fastembed: {e}"))?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        "fastembed/all-MiniLM-L6-v2"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .model
            .lock()
            .embed(inputs.to_vec(), None)
            .map_err(|e| anyhow!("embedding generation failed: {e}"))?;
        Ok(vectors.iter().map(|v| memvdb::normalize(v)).collect())
    }
}

/// A deterministic embedder for tests: hashes each input's tokens into a
/// fixed-dimension vector so cosine similarity is stable and reproducible
/// without loading an ONNX model.
pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let hash = token.bytes().fold(0u64, |acc, b| {
                acc.wrapping_mul(131).wrapping_add(b as u64)
            });
            let bucket = (hash as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        memvdb::normalize(&vector)
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for DeterministicEmbedder {
    fn model_id(&self) -> &str {
        "test/deterministic-hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|t| self.vector_for(t)).collect())
    }
}

pub type SharedEmbedder = Arc<dyn Embedder>;
