//! Shared tool-catalog types used by the Connection Pool, Semantic Index,
//! Discovery Engine, and Orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool advertised by a downstream server, as captured by a `tools/list`
/// probe. `display_name` is the `<server>:<rawName>` form used everywhere
/// upstream of the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDef {
    pub server: String,
    pub raw_name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl ToolDef {
    pub fn new(server: impl Into<String>, raw_name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        let server = server.into();
        let raw_name = raw_name.into();
        let display_name = format!("{server}:{raw_name}");
        Self {
            server,
            raw_name,
            display_name,
            description: description.into(),
            input_schema,
        }
    }

    /// The text embedded and lexically matched against: `"<rawName>. <description>"`.
    pub fn source_text(&self) -> String {
        if self.description.is_empty() {
            format!("{}.", self.raw_name)
        } else {
            format!("{}. {}", self.raw_name, self.description)
        }
    }
}

/// Outcome of the most recent `tools/list` probe against a server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    #[default]
    Pending,
    Ok,
    Failed,
}

/// Per-server entry of the tool cache (spec §3/§6): the tools a server
/// advertised on its last successful probe, plus staleness bookkeeping so a
/// restarted gateway can report it without re-probing immediately.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCatalog {
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probed_at_unix_ms: Option<u64>,
    #[serde(default)]
    pub probe_status: ProbeStatus,
}

/// Splits a `run` target of form `server:rawName` into its two parts.
/// Returns `None` if either half is empty (spec's `invalid-tool-format`).
pub fn split_display_name(display_name: &str) -> Option<(&str, &str)> {
    let (server, raw) = display_name.split_once(':')?;
    if server.is_empty() || raw.is_empty() {
        return None;
    }
    Some((server, raw))
}
