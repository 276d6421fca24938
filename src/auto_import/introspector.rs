//! Reads the upstream AI client's own MCP server catalog so the Auto-Importer
//! can seed a profile from it.
//!
//! Tolerant of two JSON shapes: a `{"mcpServers": {...}}` wrapper, or a bare
//! `HashMap<String, _>`, across the several well-known upstream-client
//! config locations.

use crate::env::expand_env_var;
use crate::profile::{AuthConfig, RemoteTransport, ServerConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// A downstream server config as read from an upstream client's own catalog,
/// before it has been validated and folded into a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamServerConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        transport: RemoteTransport,
    },
}

impl TryFrom<UpstreamServerConfig> for ServerConfig {
    type Error = String;

    fn try_from(value: UpstreamServerConfig) -> Result<Self, Self::Error> {
        match value {
            UpstreamServerConfig::Stdio { command, args, env } => {
                crate::profile::validate_subprocess_config(&command, &args)
                    .map_err(|e| e.to_string())?;
                Ok(ServerConfig::Subprocess {
                    command,
                    args,
                    env,
                    description: None,
                    enabled: None,
                })
            }
            UpstreamServerConfig::Http { url, transport } => {
                let parsed = url::Url::parse(&url).map_err(|e| format!("remote server url '{url}' is not a valid url: {e}"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!("remote server url must use http or https scheme, got '{url}'"));
                }
                Ok(ServerConfig::Remote {
                    url,
                    transport,
                    auth: AuthConfig::None,
                    description: None,
                    enabled: None,
                })
            }
        }
    }
}

/// Source of a one-shot upstream server catalog. Abstracted so tests can
/// supply a fixed list instead of reading real config files.
#[async_trait::async_trait]
pub trait UpstreamIntrospector: Send + Sync {
    async fn discover_servers(&self) -> anyhow::Result<Vec<(String, UpstreamServerConfig)>>;
}

/// Introspector that never finds anything — used when auto-import is
/// disabled, or as a safe default when no upstream config file is found.
pub struct NullIntrospector;

#[async_trait::async_trait]
impl UpstreamIntrospector for NullIntrospector {
    async fn discover_servers(&self) -> anyhow::Result<Vec<(String, UpstreamServerConfig)>> {
        Ok(Vec::new())
    }
}

/// Either shape an upstream client's MCP config file comes in: a
/// `{"mcpServers": {...}}` wrapper, or a bare map.
#[derive(Debug, Deserialize)]
struct WrappedServers {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, RawServerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        #[serde(rename = "type")]
        transport: Option<String>,
    },
}

impl RawServerConfig {
    fn into_upstream(self) -> UpstreamServerConfig {
        match self {
            RawServerConfig::Stdio { command, args, env } => {
                let env = env
                    .into_iter()
                    .map(|(k, v)| (k, expand_env_var(&v)))
                    .collect();
                UpstreamServerConfig::Stdio { command, args, env }
            }
            RawServerConfig::Http { url, transport } => {
                let transport = match transport.as_deref() {
                    Some("sse") => RemoteTransport::Sse,
                    _ => RemoteTransport::Http,
                };
                UpstreamServerConfig::Http { url, transport }
            }
        }
    }
}

fn parse_servers_file(content: &str) -> anyhow::Result<HashMap<String, UpstreamServerConfig>> {
    if let Ok(wrapped) = serde_json::from_str::<WrappedServers>(content) {
        return Ok(wrapped
            .mcp_servers
            .into_iter()
            .map(|(name, raw)| (name, raw.into_upstream()))
            .collect());
    }
    let bare: HashMap<String, RawServerConfig> = serde_json::from_str(content)?;
    Ok(bare
        .into_iter()
        .map(|(name, raw)| (name, raw.into_upstream()))
        .collect())
}

/// Well-known locations an upstream MCP client keeps its own server catalog,
/// checked in order; the first one that exists and parses wins.
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(dir) = std::env::var("CLAUDE_CONFIG_DIR") {
        candidates.push(PathBuf::from(dir).join("claude.json"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".claude.json"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("Claude").join("claude_desktop_config.json"));
    }
    #[cfg(target_os = "macos")]
    if let Some(home) = dirs::home_dir() {
        candidates.push(
            home.join("Library")
                .join("Application Support")
                .join("Claude")
                .join("claude_desktop_config.json"),
        );
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(".mcp.json"));
    }

    candidates
}

/// Reads the first well-known upstream client config file that exists and
/// parses successfully.
pub struct FileSystemIntrospector {
    paths: Vec<PathBuf>,
}

impl FileSystemIntrospector {
    pub fn new() -> Self {
        Self { paths: candidate_paths() }
    }

    #[cfg(test)]
    fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Default for FileSystemIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UpstreamIntrospector for FileSystemIntrospector {
    async fn discover_servers(&self) -> anyhow::Result<Vec<(String, UpstreamServerConfig)>> {
        for path in &self.paths {
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            if let Ok(servers) = parse_servers_file(&content) {
                return Ok(servers.into_iter().collect());
            }
        }
        Ok(Vec::new())
    }
}
