//! Unified error taxonomy for the gateway.
//!
//! Every variant here corresponds to one row of the error taxonomy in the
//! design document. Internal plumbing that no caller needs to match on uses
//! `anyhow::Result`; this enum exists at the boundaries that the Gateway
//! Protocol Surface and the Orchestrator's public contract expose.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Profile file unreadable or malformed. Recoverable by resetting the profile.
    #[error("configuration error: {0}")]
    Config(String),

    /// Command/arg contains dangerous characters. Never persisted.
    #[error("validation error: {0}")]
    Validation(String),

    /// `displayName` not present in the routing map.
    #[error("Unknown tool or resource: {0}")]
    NotFound(String),

    /// Server present but disabled by the Health Tracker.
    #[error("server disabled: {0}")]
    Disabled(String),

    /// Downstream connect failed or timed out.
    #[error("connection failed for server '{server}': {message}")]
    Connect { server: String, message: String },

    /// Downstream `tools/call` (or other RPC) failed.
    #[error("execution failed for server '{server}': {message}")]
    Exec { server: String, message: String },

    /// Malformed JSON-RPC line from the upstream peer.
    #[error("malformed request: {0}")]
    Framing(String),

    /// Unknown JSON-RPC method.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Missing or invalid params on an otherwise valid method call.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// `run` target parsed to an invalid `server:tool` shape.
    #[error("invalid tool format: {0}")]
    InvalidToolFormat(String),
}

impl GatewayError {
    /// Maps a typed error onto the JSON-RPC 2.0 error code used at the
    /// Gateway Protocol Surface (spec §6/§7). Errors that are not raised at
    /// the wire boundary (e.g. `Connect`/`Exec`, which become `ToolResult`
    /// failures instead) return `-32603` as a conservative default.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            GatewayError::Framing(_) => -32600,
            GatewayError::UnknownMethod(_) => -32601,
            GatewayError::InvalidParams(_) | GatewayError::InvalidToolFormat(_) => -32602,
            GatewayError::Config(_)
            | GatewayError::Validation(_)
            | GatewayError::NotFound(_)
            | GatewayError::Disabled(_)
            | GatewayError::Connect { .. }
            | GatewayError::Exec { .. } => -32603,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
