//! Gateway Protocol Surface: the upstream-facing JSON-RPC server.
//! Everything downstream of this module is invisible to the peer — it only
//! ever sees two tools, `find` and `run`.
//!
//! Deliberately hand-rolled rather than built on `rmcp`'s `ServerHandler` +
//! `serve(stdio())` machinery: this surface pins exact error codes for a
//! malformed envelope, a no-response contract for notifications (no `id`
//! means no reply, including on error), and a per-method responsiveness
//! budget the handler itself has to enforce. `rmcp`'s model types (`Tool`)
//! are still reused for wire-shape fidelity where it doesn't fight that —
//! see `schemas.rs` — but the framing and dispatch loop are hand-rolled.

pub mod schemas;
mod tools;

use crate::orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;

const JSONRPC_VERSION: &str = "2.0";
const PROTOCOL_VERSION: &str = "2024-11-05";

const CODE_INVALID_REQUEST: i64 = -32600;
const CODE_METHOD_NOT_FOUND: i64 = -32601;
const CODE_INVALID_PARAMS: i64 = -32602;
const CODE_INTERNAL_ERROR: i64 = -32603;

/// `initialize` must answer before the upstream peer's own handshake
/// timeout: 100ms.
const INITIALIZE_BUDGET: Duration = Duration::from_millis(100);

/// `tools/list`, `resources/list`, `prompts/list` must stay responsive even
/// mid-background-indexing: 250ms. `resources/list` and `prompts/list`
/// already self-enforce this inside the Orchestrator, so this budget here
/// is a second, generous backstop against the call itself hanging for some
/// unrelated reason.
const LIST_BUDGET: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, id, result: Some(result), error: None }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcError { code, message: message.into() }),
        }
    }
}

type DispatchResult = Result<Value, (i64, String)>;

/// Reads line-delimited JSON-RPC requests from stdin and writes one
/// response object per line to stdout. Each line dispatches on
/// its own task so a slow handler never blocks reading, or responding to,
/// the next request.
pub async fn serve_stdio(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout = Arc::new(AsyncMutex::new(tokio::io::stdout()));

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let orchestrator = orchestrator.clone();
        let stdout = stdout.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_line(&orchestrator, &line).await {
                write_response(&stdout, &response).await;
            }
        });
    }
    Ok(())
}

async fn write_response(stdout: &AsyncMutex<tokio::io::Stdout>, response: &RpcResponse) {
    let Ok(mut serialized) = serde_json::to_string(response) else {
        return;
    };
    serialized.push('\n');
    let mut stdout = stdout.lock().await;
    let _ = stdout.write_all(serialized.as_bytes()).await;
    let _ = stdout.flush().await;
}

/// Parses and dispatches one line. Returns `None` for notifications (no
/// `id` on the request) and for lines that don't even parse as JSON — one
/// bad line never takes down the loop or gets a stray response.
async fn handle_line(orchestrator: &Orchestrator, line: &str) -> Option<RpcResponse> {
    let message: RawMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "malformed JSON-RPC line, dropping it");
            return None;
        }
    };

    let is_notification = message.id.is_none();
    let id = message.id.clone().unwrap_or(Value::Null);

    let valid_envelope = matches!(&message.jsonrpc, Some(Value::String(v)) if v == JSONRPC_VERSION);
    if !valid_envelope {
        return if is_notification {
            None
        } else {
            Some(RpcResponse::err(id, CODE_INVALID_REQUEST, "missing or invalid 'jsonrpc' field, expected \"2.0\""))
        };
    }

    let Some(method) = message.method.clone() else {
        return if is_notification {
            None
        } else {
            Some(RpcResponse::err(id, CODE_INVALID_REQUEST, "missing 'method' field"))
        };
    };

    if method == "notifications/initialized" || method.starts_with("notifications/") {
        return None;
    }

    let result = dispatch(orchestrator, &method, message.params).await;
    if is_notification {
        return None;
    }

    Some(match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err((code, message)) => RpcResponse::err(id, code, message),
    })
}

async fn dispatch(orchestrator: &Orchestrator, method: &str, params: Option<Value>) -> DispatchResult {
    match method {
        "initialize" => with_budget(INITIALIZE_BUDGET, "initialize", async { Ok(handle_initialize()) }).await,
        "tools/list" => with_budget(LIST_BUDGET, "tools/list", async { Ok(handle_tools_list()) }).await,
        "tools/call" => handle_tools_call(orchestrator, params).await,
        "resources/list" => with_budget(LIST_BUDGET, "resources/list", handle_resources_list(orchestrator)).await,
        "resources/read" => handle_resources_read(orchestrator, params).await,
        "prompts/list" => with_budget(LIST_BUDGET, "prompts/list", handle_prompts_list(orchestrator)).await,
        "prompts/get" => handle_prompts_get(orchestrator, params).await,
        other => Err((CODE_METHOD_NOT_FOUND, format!("unknown method '{other}'"))),
    }
}

/// Wraps a handler with a latency budget purely as a backstop: the handler
/// bodies here are themselves expected to return well within it. A handler
/// that still misses the deadline surfaces as an internal error rather than
/// hanging the caller forever.
async fn with_budget<F>(budget: Duration, method: &str, fut: F) -> DispatchResult
where
    F: std::future::Future<Output = DispatchResult>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(method, budget_ms = budget.as_millis(), "handler exceeded its latency budget");
            Err((CODE_INTERNAL_ERROR, format!("'{method}' exceeded its latency budget")))
        }
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {},
        },
        "serverInfo": {
            "name": "ncp",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn handle_tools_list() -> Value {
    let tools: Vec<Value> = schemas::all_tools()
        .into_iter()
        .map(|tool| serde_json::to_value(tool).unwrap_or(Value::Null))
        .collect();
    json!({ "tools": tools })
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default, rename = "_meta")]
    meta: Option<Value>,
}

async fn handle_tools_call(orchestrator: &Orchestrator, params: Option<Value>) -> DispatchResult {
    let params: ToolCallParams = parse_params(params)?;
    let arguments = params.arguments.unwrap_or_else(|| json!({}));

    match params.name.as_str() {
        "find" => {
            let args: tools::FindArgs = serde_json::from_value(arguments)
                .map_err(|e| (CODE_INVALID_PARAMS, format!("invalid 'find' arguments: {e}")))?;
            let (markdown, structured) = tools::find(orchestrator, args).await;
            Ok(json!({
                "content": [{ "type": "text", "text": markdown }],
                "structuredContent": structured,
                "isError": false,
            }))
        }
        "run" => {
            let args: tools::RunArgs = serde_json::from_value(arguments)
                .map_err(|e| (CODE_INVALID_PARAMS, format!("invalid 'run' arguments: {e}")))?;
            let outcome = tools::run(orchestrator, args, params.meta).await;
            Ok(render_tool_outcome(outcome))
        }
        other => Err((CODE_INVALID_PARAMS, format!("unknown tool '{other}', expected 'find' or 'run'"))),
    }
}

fn render_tool_outcome(outcome: tools::ToolOutcome) -> Value {
    if outcome.success {
        let content = outcome.content.unwrap_or(Value::Null);
        json!({
            "content": [{ "type": "text", "text": content.to_string() }],
            "structuredContent": content,
            "isError": false,
        })
    } else {
        let message = outcome.error.unwrap_or_else(|| "tool execution failed".to_string());
        json!({
            "content": [{ "type": "text", "text": message }],
            "isError": true,
        })
    }
}

async fn handle_resources_list(orchestrator: &Orchestrator) -> DispatchResult {
    let resources = orchestrator.get_all_resources().await;
    let resources: Vec<Value> = resources
        .into_iter()
        .map(|r| {
            json!({
                "uri": format!("{}:{}", r.server, r.uri),
                "name": r.name,
                "mimeType": r.mime_type,
            })
        })
        .collect();
    Ok(json!({ "resources": resources }))
}

#[derive(Debug, Deserialize)]
struct ResourceReadParams {
    uri: String,
}

/// Reads a resource addressed as `<server>:<uri>`, matching the convention
/// `resources/list` hands back. `-32602` is reserved for a missing `uri`
/// (caught by `parse_params` above); a `uri` that is present but carries no
/// resolvable server prefix is merely unknown, not malformed, so it surfaces
/// as `-32603` like any other unresolvable route.
async fn handle_resources_read(orchestrator: &Orchestrator, params: Option<Value>) -> DispatchResult {
    let params: ResourceReadParams = parse_params(params)?;
    let (server, uri) = crate::catalog::split_display_name(&params.uri)
        .ok_or_else(|| (CODE_INTERNAL_ERROR, format!("Unknown resource uri '{}', expected '<server>:<uri>'", params.uri)))?;

    orchestrator
        .read_resource(server, uri)
        .await
        .map_err(|e| (e.json_rpc_code(), e.to_string()))
}

async fn handle_prompts_list(orchestrator: &Orchestrator) -> DispatchResult {
    let prompts = orchestrator.get_all_prompts().await;
    let prompts: Vec<Value> = prompts
        .into_iter()
        .map(|p| {
            json!({
                "name": format!("{}:{}", p.server, p.name),
                "description": p.description,
            })
        })
        .collect();
    Ok(json!({ "prompts": prompts }))
}

#[derive(Debug, Deserialize)]
struct PromptGetParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn handle_prompts_get(orchestrator: &Orchestrator, params: Option<Value>) -> DispatchResult {
    let params: PromptGetParams = parse_params(params)?;
    let (server, prompt_name) = crate::catalog::split_display_name(&params.name)
        .ok_or_else(|| (CODE_INVALID_PARAMS, format!("invalid prompt name '{}', expected '<server>:<promptName>'", params.name)))?;

    orchestrator
        .get_prompt(server, prompt_name, params.arguments)
        .await
        .map_err(|e| (e.json_rpc_code(), e.to_string()))
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, (i64, String)> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|e| (CODE_INVALID_PARAMS, format!("invalid params: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn notification_without_id_yields_no_response() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let response = handle_line(&orchestrator, line).await;
        assert!(response.is_none());
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn malformed_envelope_gets_invalid_request() {
        let line = r#"{"jsonrpc":"1.0","id":1,"method":"initialize"}"#;
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let response = handle_line(&orchestrator, line).await.unwrap();
        assert_eq!(response.error.unwrap().code, CODE_INVALID_REQUEST);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn unknown_method_gets_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"method":"bogus/method"}"#;
        let response = handle_line(&orchestrator, line).await.unwrap();
        assert_eq!(response.error.unwrap().code, CODE_METHOD_NOT_FOUND);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn tools_list_returns_find_and_run() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let response = handle_line(&orchestrator, line).await.unwrap();
        let result = response.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn run_with_invalid_tool_format_is_reported_as_tool_failure_not_rpc_error() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"run","arguments":{"tool":"no-colon"}}}"#;
        let response = handle_line(&orchestrator, line).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn resources_read_without_server_prefix_is_unknown_resource() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"bare-uri"}}"#;
        let response = handle_line(&orchestrator, line).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, CODE_INTERNAL_ERROR);
        assert!(error.message.contains("Unknown"));
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn resources_read_with_missing_uri_is_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NCP_CONFIG_PATH", dir.path());
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = crate::orchestrator::Orchestrator::new(
            "all",
            std::sync::Arc::new(crate::discovery::DeterministicEmbedder::new()),
            std::sync::Arc::new(crate::auto_import::NullIntrospector),
        )
        .await
        .unwrap();

        let line = r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{}}"#;
        let response = handle_line(&orchestrator, line).await.unwrap();
        assert_eq!(response.error.unwrap().code, CODE_INVALID_PARAMS);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }
}
