//! On-disk tool cache (spec §6): `cache/<profile>.tools.json`, the
//! short-circuit that lets the Orchestrator skip probing every configured
//! server when the profile hasn't changed since the last successful
//! background initialization.

use crate::catalog::ToolCatalog;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolsCacheFile {
    pub profile_hash: String,
    pub created_at_unix_ms: u64,
    pub mcps: HashMap<String, ToolCatalog>,
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ToolsCacheFile {
    pub fn new(profile_hash: String, mcps: HashMap<String, ToolCatalog>) -> Self {
        Self {
            profile_hash,
            created_at_unix_ms: now_unix_ms(),
            mcps,
        }
    }

    /// Loads the cache only if its `profileHash` matches `profile_hash`.
    /// A missing file, a corrupt file, or a hash mismatch are all treated
    /// identically: "no usable cache, probe from scratch".
    pub fn load_if_matching(path: &Path, profile_hash: &str) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let cache: Self = serde_json::from_str(&content).ok()?;
        if cache.profile_hash != profile_hash {
            return None;
        }
        Some(cache)
    }

    pub fn persist(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProbeStatus, ToolDef};
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.tools.json");
        let mut mcps = HashMap::new();
        mcps.insert(
            "fs".to_string(),
            ToolCatalog {
                tools: vec![ToolDef::new("fs", "read_file", "Reads a file", serde_json::json!({}))],
                last_probed_at_unix_ms: Some(123),
                probe_status: ProbeStatus::Ok,
            },
        );
        let cache = ToolsCacheFile::new("hash1".to_string(), mcps);
        cache.persist(&path).unwrap();

        let loaded = ToolsCacheFile::load_if_matching(&path, "hash1").unwrap();
        assert_eq!(loaded.mcps["fs"].tools.len(), 1);
    }

    #[test]
    fn hash_mismatch_is_treated_as_no_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.tools.json");
        let cache = ToolsCacheFile::new("hash1".to_string(), HashMap::new());
        cache.persist(&path).unwrap();

        assert!(ToolsCacheFile::load_if_matching(&path, "hash2").is_none());
    }

    #[test]
    fn missing_file_is_treated_as_no_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert!(ToolsCacheFile::load_if_matching(&path, "hash1").is_none());
    }
}
