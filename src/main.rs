//! Process entry point: wires up logging, loads the active profile into an
//! `Orchestrator`, and serves the Gateway Protocol Surface over stdio.
//!
//! Exit codes per the persisted-state/env-vars contract: `0` on a normal
//! shutdown, `1` on an unrecoverable startup error. All other failures are
//! surfaced over JSON-RPC and never exit the process.

use ncp::auto_import::FileSystemIntrospector;
use ncp::discovery::FastEmbedder;
use ncp::orchestrator::Orchestrator;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let debug = std::env::var("NCP_DEBUG").as_deref() == Ok("true");
    if debug {
        ncp::logging::set_mcp_mode(true);
        if let Err(error) = ncp::logging::init(None) {
            eprintln!("failed to initialize logging: {error}");
            return ExitCode::from(1);
        }
    }

    match run().await {
        Ok(()) => ExitCode::from(0),
        Err(error) => {
            tracing::error!(%error, "unrecoverable startup error");
            eprintln!("ncp: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let profile_name = ncp::paths::default_profile_name();

    let embedder: Arc<dyn ncp::discovery::Embedder> = Arc::new(
        FastEmbedder::try_new().map_err(|e| anyhow::anyhow!("failed to load embedding model: {e}"))?,
    );
    let introspector = Arc::new(FileSystemIntrospector::new());

    let orchestrator = Orchestrator::new(profile_name, embedder, introspector).await?;
    orchestrator.initialize().await;

    let shutdown = {
        let orchestrator = orchestrator.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            orchestrator.cleanup().await;
        }
    };

    tokio::select! {
        result = ncp::gateway::serve_stdio(orchestrator.clone()) => result,
        _ = shutdown => Ok(()),
    }
}
