//! The Profile data model (spec §3/§4.1): a named, persisted collection of
//! downstream server configurations.

mod store;
mod validate;

pub use store::{AddServerError, ProfileStore};
pub use validate::validate_subprocess_config;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named, persisted collection of downstream server configurations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl Profile {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            mcp_servers: HashMap::new(),
        }
    }
}

/// A downstream Tool Server's launch recipe: either a subprocess we spawn
/// ourselves, or a remote endpoint reached over HTTP/SSE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        enabled: Option<bool>,
    },
    Remote {
        url: String,
        transport: RemoteTransport,
        #[serde(default)]
        auth: AuthConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        enabled: Option<bool>,
    },
}

impl ServerConfig {
    pub fn enabled(&self) -> bool {
        match self {
            ServerConfig::Subprocess { enabled, .. } => enabled.unwrap_or(true),
            ServerConfig::Remote { enabled, .. } => enabled.unwrap_or(true),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            ServerConfig::Subprocess { description, .. } => description.as_deref(),
            ServerConfig::Remote { description, .. } => description.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTransport {
    Http,
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        header: String,
        value: String,
    },
    Basic {
        username: String,
        password: String,
    },
    #[serde(rename = "oauthDeviceFlow")]
    OauthDeviceFlow {
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        device_auth_url: String,
        token_url: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
}
