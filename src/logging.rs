//! Process-wide logging.
//!
//! Stdout is the upstream JSON-RPC transport (see `gateway`), so logging must
//! never write there. In MCP mode, diagnostics go to `logs/ncp.log` under the
//! config directory; in CLI/test mode they go to stderr.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static MCP_MODE: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Switches the process-wide logger between MCP mode (file-backed, silent
/// stdout) and CLI/test mode (stderr, ANSI-colored). Safe to call before or
/// after `init`; takes effect on the next `init` call.
pub fn set_mcp_mode(enabled: bool) {
    MCP_MODE.store(enabled, Ordering::SeqCst);
}

pub fn is_mcp_mode() -> bool {
    MCP_MODE.load(Ordering::SeqCst)
}

/// Initializes the global `tracing` subscriber. Idempotent: subsequent calls
/// are no-ops so library consumers and tests can call it freely.
pub fn init(log_file: Option<PathBuf>) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ncp=debug"));

    if is_mcp_mode() {
        let path = log_file.unwrap_or_else(default_log_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let file_layer = fmt::layer()
            .with_writer(std::sync::Arc::new(file))
            .with_target(true)
            .with_ansi(false)
            .with_level(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
            .with_level(true)
            .compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }

    tracing::info!(mcp_mode = is_mcp_mode(), "logger initialized");
    Ok(())
}

fn default_log_path() -> PathBuf {
    crate::paths::config_dir().join("logs").join("ncp.log")
}
