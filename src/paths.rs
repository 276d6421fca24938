//! Resolution of the gateway's on-disk config root and the well-known
//! paths beneath it.
//!
//! This and the logger are the only two pieces of process-wide global
//! state; everything else is threaded through the `Orchestrator` instance
//! so tests stay hermetic.

use std::path::PathBuf;

const ENV_CONFIG_PATH: &str = "NCP_CONFIG_PATH";

/// Root config directory, typically `~/.ncp/`. Overridable via
/// `NCP_CONFIG_PATH` for tests and alternate installs.
pub fn config_dir() -> PathBuf {
    if let Ok(custom) = std::env::var(ENV_CONFIG_PATH) {
        return PathBuf::from(custom);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ncp")
}

pub fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

pub fn profile_path(name: &str) -> PathBuf {
    profiles_dir().join(format!("{name}.json"))
}

pub fn cache_dir() -> PathBuf {
    config_dir().join("cache")
}

pub fn tool_cache_path(profile: &str) -> PathBuf {
    cache_dir().join(format!("{profile}.tools.json"))
}

pub fn embeddings_cache_path() -> PathBuf {
    cache_dir().join("embeddings.json")
}

pub fn health_path() -> PathBuf {
    config_dir().join("health.json")
}

pub fn tokens_dir() -> PathBuf {
    config_dir().join("tokens")
}

pub fn token_path(server_name: &str) -> PathBuf {
    tokens_dir().join(format!("{server_name}.json"))
}

pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Default profile name, overridable via `NCP_PROFILE`.
pub fn default_profile_name() -> String {
    std::env::var("NCP_PROFILE").unwrap_or_else(|_| "all".to_string())
}

/// Working directory that subprocess servers should be launched in, if the
/// caller asked for one via `NCP_WORKING_DIR`.
pub fn subprocess_working_dir() -> Option<PathBuf> {
    std::env::var("NCP_WORKING_DIR").ok().map(PathBuf::from)
}
