//! Semantic Index: vector embeddings of tool name+description, persisted to
//! disk, searched by cosine similarity with a domain-hint boost. Backed by a
//! single `memvdb::CacheDB` collection (`Distance::Cosine`) generalized over
//! any `Embedder`, with disk persistence and configHash/age-based cache
//! invalidation on top.

use crate::catalog::ToolDef;
use crate::discovery::domain_hints;
use crate::discovery::embedder::SharedEmbedder;
use anyhow::{anyhow, Result};
use memvdb::{CacheDB, Distance, Embedding};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

const COLLECTION: &str = "tools";
const CACHE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const CACHE_VERSION: u32 = 1;

/// Similarity floor below which a candidate is dropped before reranking.
pub const DEFAULT_BASE_THRESHOLD: f32 = 0.35;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
    vector: Vec<f32>,
    source_text: String,
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    created_at_unix_ms: u64,
    config_hash: String,
    version: u32,
    model_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    metadata: CacheMetadata,
    embeddings: HashMap<String, CachedEntry>,
}

/// A single ranked hit from [`SemanticIndex::query`].
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub display_name: String,
    pub score: f32,
    pub description: String,
}

pub struct SemanticIndex {
    embedder: SharedEmbedder,
    cache_path: PathBuf,
    db: Mutex<CacheDB>,
    indexed_count: std::sync::atomic::AtomicUsize,
    base_threshold: f32,
}

impl SemanticIndex {
    pub fn new(embedder: SharedEmbedder, cache_path: PathBuf) -> Result<Self> {
        let mut db = CacheDB::new();
        db.create_collection(COLLECTION.to_string(), embedder.dimension(), Distance::Cosine)?;
        Ok(Self {
            embedder,
            cache_path,
            db: Mutex::new(db),
            indexed_count: std::sync::atomic::AtomicUsize::new(0),
            base_threshold: DEFAULT_BASE_THRESHOLD,
        })
    }

    pub fn with_base_threshold(mut self, threshold: f32) -> Self {
        self.base_threshold = threshold;
        self
    }

    /// Loads the on-disk cache if present and still valid for `config_hash`
    /// (exact match) and age (≤ 7 days) and model (exact match); otherwise
    /// embeds every tool fresh and persists a new cache. Either way, the
    /// in-memory index reflects exactly `tools` on return.
    pub fn rebuild(&self, tools: &[ToolDef], config_hash: &str) -> Result<()> {
        if let Some(cached) = self.try_load_valid_cache(config_hash) {
            self.load_from_cache(tools, &cached);
            return Ok(());
        }

        let texts: Vec<String> = tools.iter().map(ToolDef::source_text).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts)?
        };

        let mut db = CacheDB::new();
        db.create_collection(COLLECTION.to_string(), self.embedder.dimension(), Distance::Cosine)?;
        let mut persisted = HashMap::with_capacity(tools.len());
        for (tool, vector) in tools.iter().zip(vectors.into_iter()) {
            db.insert_into_collection(COLLECTION, to_embedding(tool, &vector))?;
            persisted.insert(
                tool.display_name.clone(),
                CachedEntry {
                    vector,
                    source_text: tool.source_text(),
                    description: tool.description.clone(),
                },
            );
        }
        *self.db.lock() = db;
        self.indexed_count
            .store(tools.len(), std::sync::atomic::Ordering::SeqCst);

        let cache_file = CacheFile {
            metadata: CacheMetadata {
                created_at_unix_ms: now_unix_ms(),
                config_hash: config_hash.to_string(),
                version: CACHE_VERSION,
                model_id: self.embedder.model_id().to_string(),
            },
            embeddings: persisted,
        };
        self.persist(&cache_file);
        Ok(())
    }

    fn try_load_valid_cache(&self, config_hash: &str) -> Option<CacheFile> {
        let content = std::fs::read_to_string(&self.cache_path).ok()?;
        let cache: CacheFile = serde_json::from_str(&content).ok()?;
        if cache.metadata.config_hash != config_hash {
            return None;
        }
        if cache.metadata.model_id != self.embedder.model_id() {
            return None;
        }
        let age = Duration::from_millis(now_unix_ms().saturating_sub(cache.metadata.created_at_unix_ms));
        if age > CACHE_MAX_AGE {
            return None;
        }
        Some(cache)
    }

    fn load_from_cache(&self, tools: &[ToolDef], cache: &CacheFile) {
        let mut db = CacheDB::new();
        if db
            .create_collection(COLLECTION.to_string(), self.embedder.dimension(), Distance::Cosine)
            .is_err()
        {
            return;
        }
        let mut count = 0;
        for tool in tools {
            if let Some(entry) = cache.embeddings.get(&tool.display_name) {
                if db.insert_into_collection(COLLECTION, to_embedding(tool, &entry.vector)).is_ok() {
                    count += 1;
                }
            }
        }
        *self.db.lock() = db;
        self.indexed_count.store(count, std::sync::atomic::Ordering::SeqCst);
    }

    fn persist(&self, cache: &CacheFile) {
        let Some(parent) = self.cache_path.parent() else { return };
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
        let Ok(content) = serde_json::to_string_pretty(cache) else { return };
        let tmp = self.cache_path.with_extension("json.tmp");
        if std::fs::write(&tmp, content).is_err() {
            return;
        }
        let _ = std::fs::rename(&tmp, &self.cache_path);
    }

    /// Cosine search over the in-memory index, boosted by domain hints and
    /// filtered to `score >= base_threshold`. Returns at most `2 * limit`
    /// candidates, highest score first. Returns an empty vector (never an
    /// error path a caller must special-case) when nothing is indexed.
    pub fn query(&self, text: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(text)?;
        let db = self.db.lock();
        let collection = db
            .get_collection(COLLECTION)
            .ok_or_else(|| anyhow!("tools collection missing after existence check"))?;

        let raw = collection.get_similarity(&query_vector, (2 * limit).max(limit));
        let mut hits: Vec<SemanticHit> = raw
            .into_iter()
            .filter_map(|r| {
                let metadata = r.embedding.metadata?;
                let display_name = metadata.get("display_name")?.clone();
                let source_text = metadata.get("source_text").cloned().unwrap_or_default();
                let description = metadata.get("description").cloned().unwrap_or_default();
                let score = r.score + domain_hints::boost_for(text, &source_text);
                Some(SemanticHit {
                    display_name,
                    score,
                    description,
                })
            })
            .filter(|hit| hit.score >= self.base_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(2 * limit);
        Ok(hits)
    }

    pub fn is_empty(&self) -> bool {
        self.indexed_count.load(std::sync::atomic::Ordering::SeqCst) == 0
    }
}

fn to_embedding(tool: &ToolDef, vector: &[f32]) -> Embedding {
    Embedding {
        id: HashMap::from([("display_name".to_string(), tool.display_name.clone())]),
        vector: vector.to_vec(),
        metadata: Some(HashMap::from([
            ("display_name".to_string(), tool.display_name.clone()),
            ("server".to_string(), tool.server.clone()),
            ("source_text".to_string(), tool.source_text()),
            ("description".to_string(), tool.description.clone()),
        ])),
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::embedder::DeterministicEmbedder;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn tool(server: &str, raw: &str, description: &str) -> ToolDef {
        ToolDef::new(server, raw, description, serde_json::json!({"type": "object"}))
    }

    #[test]
    fn empty_index_returns_empty_without_error() {
        let dir = tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), dir.path().join("embeddings.json")).unwrap();
        let hits = index.query("anything", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn rebuild_then_query_finds_similar_tool() {
        let dir = tempdir().unwrap();
        let index = SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), dir.path().join("embeddings.json")).unwrap();
        let tools = vec![
            tool("fs", "read_file", "Reads a file from disk"),
            tool("fs", "write_file", "Writes a file to disk"),
            tool("weather", "get_forecast", "Returns a weather forecast"),
        ];
        index.rebuild(&tools, "hash1").unwrap();

        let hits = index.query("read file contents", 5).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].display_name, "fs:read_file");
    }

    #[test]
    fn cache_is_reused_when_hash_matches() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("embeddings.json");
        let tools = vec![tool("fs", "read_file", "Reads a file")];

        {
            let index = SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), cache_path.clone()).unwrap();
            index.rebuild(&tools, "stable-hash").unwrap();
        }
        assert!(cache_path.exists());

        let index2 = SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), cache_path).unwrap();
        index2.rebuild(&tools, "stable-hash").unwrap();
        let hits = index2.query("read a file", 5).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn cache_invalidated_on_hash_mismatch() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("embeddings.json");
        let tools = vec![tool("fs", "read_file", "Reads a file")];

        let index = SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), cache_path.clone()).unwrap();
        index.rebuild(&tools, "hash-a").unwrap();

        let more_tools = vec![
            tool("fs", "read_file", "Reads a file"),
            tool("fs", "delete_file", "Deletes a file"),
        ];
        index.rebuild(&more_tools, "hash-b").unwrap();
        let hits = index.query("delete a file", 5).unwrap();
        assert!(hits.iter().any(|h| h.display_name == "fs:delete_file"));
    }
}
