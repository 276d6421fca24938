//! Fixed two-tool catalog the upstream peer sees (spec §4.8): `find` and
//! `run`. This list never changes shape and never awaits anything, which is
//! what lets `tools/list` satisfy its 250 ms SLA regardless of how many
//! downstream servers are configured.
//!
//! Grounded on the teacher's `Tool` construction in
//! `mcp_routing::mod::build_dynamic_tool_definition` (`input_schema` is an
//! `Arc<serde_json::Map<String, Value>>`, not a bare `Value`).

use rmcp::model::Tool;
use serde_json::{Map, Value};
use std::sync::Arc;

fn schema_map(value: Value) -> Arc<Map<String, Value>> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(Map::new()),
    }
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string().into(),
        title: None,
        description: Some(description.to_string().into()),
        input_schema: schema_map(input_schema),
        output_schema: None,
        icons: None,
        annotations: None,
        execution: None,
        meta: None,
    }
}

pub fn find_tool() -> Tool {
    tool(
        "find",
        "Search the aggregated catalog of every downstream MCP tool by natural-language description. Returns a ranked markdown listing with rationale; use `run` to invoke a result.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Natural-language description of the capability you need. Empty or omitted lists the top tools.",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results.",
                    "default": 10,
                },
                "depth": {
                    "type": "integer",
                    "enum": [0, 1, 2],
                    "description": "0/1: name and rationale only. 2: also include each result's input schema.",
                },
                "confidenceThreshold": {
                    "type": "number",
                    "description": "Override the default minimum confidence score for a result to be included.",
                },
            },
            "additionalProperties": false,
        }),
    )
}

pub fn run_tool() -> Tool {
    tool(
        "run",
        "Invoke a downstream tool previously surfaced by `find`, addressed as \"server:rawName\".",
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool": {
                    "type": "string",
                    "description": "Target tool in \"server:rawName\" form, as returned by `find`.",
                },
                "parameters": {
                    "type": "object",
                    "description": "Arguments forwarded to the downstream tool.",
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "When true, returns a preview of the resolved server/tool/arguments without contacting the downstream server.",
                },
            },
            "required": ["tool"],
            "additionalProperties": false,
        }),
    )
}

pub fn all_tools() -> Vec<Tool> {
    vec![find_tool(), run_tool()]
}
