//! Discovery Engine: wraps the Semantic Index with a lexical reranker and an
//! intent penalty, with a listing fallback so `find` always succeeds.

use crate::catalog::ToolDef;
use crate::discovery::lexer::{classify, dominant_action, tokenize};
use crate::discovery::semantic_index::SemanticIndex;
use crate::health::HealthTracker;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.35;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub display_name: String,
    pub confidence: f32,
    pub rationale: String,
    pub schema: Option<Value>,
}

pub struct DiscoveryEngine {
    index: Arc<SemanticIndex>,
    health: Arc<HealthTracker>,
}

impl DiscoveryEngine {
    pub fn new(index: Arc<SemanticIndex>, health: Arc<HealthTracker>) -> Self {
        Self { index, health }
    }

    /// `tools` is the full current catalog (`allTools`), keyed implicitly by
    /// `display_name` for the lexical pass. Empty `description` lists up to
    /// `limit` tools with confidence 1.0. Always succeeds: a Semantic Index
    /// error falls back to the listing path.
    pub async fn find_relevant_tools(
        &self,
        tools: &[ToolDef],
        description: &str,
        limit: usize,
        detailed: bool,
        confidence_threshold: f32,
    ) -> Vec<Candidate> {
        let by_name: HashMap<&str, &ToolDef> =
            tools.iter().map(|t| (t.display_name.as_str(), t)).collect();

        let mut candidates = if description.trim().is_empty() {
            self.list_all(tools, limit, detailed)
        } else {
            match self.index.query(description, limit) {
                Ok(hits) if !hits.is_empty() => {
                    let mut ranked: Vec<Candidate> = hits
                        .into_iter()
                        .filter_map(|hit| {
                            let tool = by_name.get(hit.display_name.as_str())?;
                            let lexical = lexical_rerank(description, tool);
                            let confidence = (hit.score + lexical).clamp(0.0, 1.0);
                            Some(Candidate {
                                display_name: tool.display_name.clone(),
                                confidence,
                                rationale: rationale_for(description, tool, confidence),
                                schema: detailed.then(|| tool.input_schema.clone()),
                            })
                        })
                        .filter(|c| c.confidence >= confidence_threshold)
                        .collect();
                    ranked.sort_by(|a, b| {
                        b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    ranked.truncate(limit);
                    ranked
                }
                Ok(_) => self.list_all(tools, limit, detailed),
                Err(_) => self.list_all(tools, limit, detailed),
            }
        };

        let healthy_servers: Vec<String> = {
            let mut servers: Vec<String> = candidates
                .iter()
                .filter_map(|c| c.display_name.split_once(':').map(|(s, _)| s.to_string()))
                .collect();
            servers.sort();
            servers.dedup();
            servers
        };
        let healthy: std::collections::HashSet<&String> =
            self.health.filter_healthy(&healthy_servers).await.into_iter().collect();
        candidates.retain(|c| {
            c.display_name
                .split_once(':')
                .map(|(server, _)| healthy.contains(&server.to_string()))
                .unwrap_or(false)
        });

        candidates
    }

    fn list_all(&self, tools: &[ToolDef], limit: usize, detailed: bool) -> Vec<Candidate> {
        tools
            .iter()
            .take(limit)
            .map(|tool| Candidate {
                display_name: tool.display_name.clone(),
                confidence: 1.0,
                rationale: "listed: no query provided".to_string(),
                schema: detailed.then(|| tool.input_schema.clone()),
            })
            .collect()
    }
}

/// Lexical score plus intent penalty plus literal-match tie-break, per §4.5.
fn lexical_rerank(description: &str, tool: &ToolDef) -> f32 {
    let tokens = tokenize(description);
    let raw_name = tool.raw_name.to_lowercase();
    let desc = tool.description.to_lowercase();

    let mut score = 0.0;
    let mut literal_matches = 0;
    for token in &tokens {
        let (name_weight, desc_weight) = classify(token).weights();
        if raw_name.contains(token.as_str()) {
            score += name_weight;
            literal_matches += 1;
        }
        if desc.contains(token.as_str()) {
            score += desc_weight;
        }
    }

    score += intent_penalty(&tokens, &raw_name);
    score += literal_matches as f32 * 0.001;
    score
}

fn intent_penalty(tokens: &[String], raw_name: &str) -> f32 {
    let Some(action) = dominant_action(tokens) else {
        return 0.0;
    };

    let has = |needle: &str| raw_name.contains(needle);
    match action {
        "save" | "write" | "create" | "add" if has("read") && !has("write") && !has("edit") => -0.3,
        "read" | "view" | "get" if (has("write") || has("create") || has("delete")) && !has("read") => -0.2,
        "delete" | "remove" if has("create") || has("add") => -0.3,
        _ => 0.0,
    }
}

fn rationale_for(description: &str, tool: &ToolDef, confidence: f32) -> String {
    let tokens = tokenize(description);
    let matched: Vec<&str> = tokens
        .iter()
        .filter(|t| tool.raw_name.to_lowercase().contains(t.as_str()))
        .map(|s| s.as_str())
        .collect();
    if matched.is_empty() {
        format!("semantic match for \"{description}\" (confidence {confidence:.2})")
    } else {
        format!("matched terms [{}] (confidence {confidence:.2})", matched.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::embedder::DeterministicEmbedder;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn engine_with(tools: &[ToolDef]) -> (DiscoveryEngine, Arc<HealthTracker>) {
        let dir = tempdir().unwrap();
        let index = Arc::new(
            SemanticIndex::new(Arc::new(DeterministicEmbedder::new()), dir.path().join("embeddings.json")).unwrap(),
        );
        index.rebuild(tools, "test-hash").unwrap();
        let health = HealthTracker::load(dir.path().join("health.json")).await.unwrap();
        std::mem::forget(dir);
        (DiscoveryEngine::new(index, health.clone()), health)
    }

    #[tokio::test]
    async fn empty_description_lists_all_with_full_confidence() {
        let tools = vec![
            ToolDef::new("fs", "read_file", "Reads a file", serde_json::json!({})),
            ToolDef::new("fs", "write_file", "Writes a file", serde_json::json!({})),
        ];
        let (engine, _health) = engine_with(&tools).await;
        let candidates = engine
            .find_relevant_tools(&tools, "", 10, false, DEFAULT_CONFIDENCE_THRESHOLD)
            .await;
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.confidence == 1.0));
    }

    #[tokio::test]
    async fn intent_penalty_demotes_wrong_direction_tool() {
        let tools = vec![
            ToolDef::new("fs", "read_file", "Reads file contents", serde_json::json!({})),
            ToolDef::new("fs", "write_file", "Writes file contents", serde_json::json!({})),
        ];
        let (engine, _health) = engine_with(&tools).await;
        let candidates = engine
            .find_relevant_tools(&tools, "save this file", 10, false, 0.0)
            .await;
        let read = candidates.iter().find(|c| c.display_name == "fs:read_file");
        let write = candidates.iter().find(|c| c.display_name == "fs:write_file");
        if let (Some(read), Some(write)) = (read, write) {
            assert!(write.confidence > read.confidence);
        }
    }

    #[tokio::test]
    async fn disabled_server_excluded_from_results() {
        let tools = vec![ToolDef::new("svc", "do_thing", "Does a thing", serde_json::json!({}))];
        let (engine, health) = engine_with(&tools).await;
        health.disable("svc").await.unwrap();
        let candidates = engine
            .find_relevant_tools(&tools, "", 10, false, DEFAULT_CONFIDENCE_THRESHOLD)
            .await;
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn detailed_flag_includes_schema() {
        let tools = vec![ToolDef::new(
            "fs",
            "read_file",
            "Reads a file",
            serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )];
        let (engine, _health) = engine_with(&tools).await;
        let candidates = engine
            .find_relevant_tools(&tools, "", 10, true, DEFAULT_CONFIDENCE_THRESHOLD)
            .await;
        assert!(candidates[0].schema.is_some());
    }
}
