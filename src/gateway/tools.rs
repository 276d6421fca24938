//! Handlers for the two synthetic tools the upstream peer ever sees: `find`
//! and `run` (spec §4.8). Everything else in the gateway is plumbing around
//! these two.

use crate::discovery::Candidate;
use crate::orchestrator::Orchestrator;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_FIND_LIMIT: usize = 10;

#[derive(Debug, Deserialize, Default)]
pub struct FindArgs {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub depth: Option<u8>,
    #[serde(default, rename = "confidenceThreshold")]
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct RunArgs {
    pub tool: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

/// Outcome of the `run` synthetic tool. Mirrors `CallToolResult`'s
/// success/error split rather than raising a JSON-RPC error, since a failed
/// downstream execution is a normal `run` outcome, not a malformed request.
pub struct ToolOutcome {
    pub success: bool,
    pub content: Option<Value>,
    pub error: Option<String>,
}

/// Ranks the aggregated catalog against `args.description` and renders both
/// a markdown listing (what most MCP clients show the model) and a
/// structured `results` array (spec §4.8's synthetic tool contract).
pub async fn find(orchestrator: &Orchestrator, args: FindArgs) -> (String, Value) {
    let description = args.description.unwrap_or_default();
    let limit = args.limit.unwrap_or(DEFAULT_FIND_LIMIT).max(1);
    let detailed = args.depth == Some(2);

    let candidates = orchestrator
        .find(&description, limit, detailed, args.confidence_threshold)
        .await;

    let markdown = render_markdown(&description, &candidates, detailed);
    let structured = json!({
        "results": candidates.iter().map(candidate_json).collect::<Vec<_>>(),
    });
    (markdown, structured)
}

fn candidate_json(candidate: &Candidate) -> Value {
    let mut entry = json!({
        "displayName": candidate.display_name,
        "confidence": candidate.confidence,
        "rationale": candidate.rationale,
    });
    if let Some(schema) = &candidate.schema {
        entry["inputSchema"] = schema.clone();
    }
    entry
}

fn render_markdown(description: &str, candidates: &[Candidate], detailed: bool) -> String {
    if candidates.is_empty() {
        return if description.trim().is_empty() {
            "Available tools: none configured yet. Add a downstream MCP server to this profile to get started.".to_string()
        } else {
            format!(
                "Available tools: no match for \"{description}\". Try a broader description, or add a downstream MCP server that covers this capability."
            )
        };
    }

    let mut out = format!("Available tools: {} match(es) for \"{description}\":\n\n", candidates.len());
    for candidate in candidates {
        out.push_str(&format!(
            "- **{}** (confidence {:.2}) — {}\n",
            candidate.display_name, candidate.confidence, candidate.rationale
        ));
        if detailed {
            if let Some(schema) = &candidate.schema {
                out.push_str(&format!("  schema: `{schema}`\n"));
            }
        }
    }
    out
}

/// Resolves `args.tool` and either previews the call (`dry_run`) or forwards
/// it through the Orchestrator.
pub async fn run(orchestrator: &Orchestrator, args: RunArgs, meta: Option<Value>) -> ToolOutcome {
    if args.dry_run.unwrap_or(false) {
        return match crate::catalog::split_display_name(&args.tool) {
            Some((server, raw)) => ToolOutcome {
                success: true,
                content: Some(json!({
                    "preview": true,
                    "server": server,
                    "tool": raw,
                    "parameters": args.parameters.clone().unwrap_or(Value::Null),
                })),
                error: None,
            },
            None => ToolOutcome {
                success: false,
                content: None,
                error: Some(format!(
                    "invalid tool format: \"{}\", expected \"server:rawName\"",
                    args.tool
                )),
            },
        };
    }

    let parameters = args.parameters.unwrap_or_else(|| json!({}));
    match orchestrator.run(&args.tool, parameters, meta).await {
        Ok(value) => ToolOutcome {
            success: true,
            content: Some(value),
            error: None,
        },
        Err(error) => ToolOutcome {
            success: false,
            content: None,
            error: Some(error.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_catalog_markdown_mentions_available_tools() {
        let markdown = render_markdown("", &[], false);
        assert!(markdown.contains("Available tools"));
    }

    #[test]
    fn no_match_markdown_still_mentions_available_tools() {
        let markdown = render_markdown("read a file", &[], false);
        assert!(markdown.contains("Available tools"));
        assert!(markdown.contains("read a file"));
    }

    #[test]
    fn detailed_listing_includes_schema() {
        let candidates = vec![Candidate {
            display_name: "fs:read_file".to_string(),
            confidence: 0.8,
            rationale: "matches 'read'".to_string(),
            schema: Some(json!({"type": "object"})),
        }];
        let markdown = render_markdown("read", &candidates, true);
        assert!(markdown.contains("schema:"));
    }
}
