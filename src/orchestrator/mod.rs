//! The Orchestrator (spec §4.7): the gateway's central coordinator. Owns the
//! active Profile, the aggregated tool catalog, and every long-lived
//! subsystem (Connection Pool, Health Tracker, Discovery Engine), and
//! exposes the small set of operations the Gateway Protocol Surface actually
//! calls: `find`, `run`, resource/prompt aggregation, and lifecycle.
//!
//! Construction returns immediately; the expensive part (auto-import,
//! per-server probing, semantic index rebuild) runs in a background task so
//! the upstream peer's `initialize` handshake never blocks on it, per the
//! teacher's own pattern of deferring `IntelligentRouter` warmup off the
//! request path in `mcp/mod.rs`.

pub mod cache;
pub mod config_hash;
mod watcher;

use crate::auto_import::{run_auto_import, UpstreamIntrospector};
use crate::catalog::{ProbeStatus, ToolCatalog, ToolDef};
use crate::discovery::{Candidate, DiscoveryEngine, SemanticIndex, SharedEmbedder, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::error::GatewayError;
use crate::health::{HealthReport, HealthTracker};
use crate::pool::ConnectionPool;
use crate::profile::{Profile, ProfileStore, ServerConfig};
use cache::ToolsCacheFile;
use config_hash::config_hash;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

/// Upper bound on concurrently in-flight `tools/list` probes during
/// background initialization, so a profile with dozens of servers doesn't
/// spawn dozens of subprocesses at once.
const BACKGROUND_PROBE_CONCURRENCY: usize = 8;

/// Per-server probe timeout for `getAllResources`/`getAllPrompts` (spec
/// §4.7 point 4): a slow or hung server contributes nothing rather than
/// stalling the whole call.
const PER_SERVER_AGGREGATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Global wall-clock budget for the same two calls (spec §4.8/§5's
/// responsiveness discipline: "impose a global deadline (default 250ms) and
/// return the partial union gathered so far"). Whichever per-server probes
/// haven't finished by this point simply don't contribute, same as a probe
/// that timed out on its own.
const GLOBAL_AGGREGATION_DEADLINE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorState {
    Cold,
    Warming,
    Ready,
}

/// A downstream resource, annotated with the server that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub server: String,
}

/// A downstream prompt, annotated with the server that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct PromptEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub server: String,
}

pub struct Orchestrator {
    profile_name: String,
    profile_store: ProfileStore,
    profile: RwLock<Profile>,
    catalogs: RwLock<HashMap<String, ToolCatalog>>,
    all_tools: RwLock<Vec<ToolDef>>,
    tool_to_server: RwLock<HashMap<String, String>>,
    pool: Arc<ConnectionPool>,
    health: Arc<HealthTracker>,
    discovery: Arc<DiscoveryEngine>,
    semantic_index: Arc<SemanticIndex>,
    introspector: Arc<dyn UpstreamIntrospector>,
    denylist: Vec<String>,
    confidence_threshold: f32,
    cache_path: PathBuf,
    profile_path: PathBuf,
    state: RwLock<OrchestratorState>,
    cancel: CancellationToken,
    background_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Builds every subsystem and loads the named profile from disk, but
    /// does not probe anything yet — call [`Orchestrator::initialize`] for
    /// that.
    pub async fn new(
        profile_name: impl Into<String>,
        embedder: SharedEmbedder,
        introspector: Arc<dyn UpstreamIntrospector>,
    ) -> anyhow::Result<Arc<Self>> {
        let profile_name = profile_name.into();
        let profile_store = ProfileStore::default_at_config_dir();
        let profile = profile_store.get_profile(&profile_name)?;

        let health = HealthTracker::load(crate::paths::health_path()).await?;
        let pool = Arc::new(ConnectionPool::new(health.clone()));
        let semantic_index = Arc::new(
            SemanticIndex::new(embedder, crate::paths::embeddings_cache_path())
                .map_err(|e| anyhow::anyhow!("building semantic index: {e}"))?,
        );
        let discovery = Arc::new(DiscoveryEngine::new(semantic_index.clone(), health.clone()));

        Ok(Arc::new(Self {
            cache_path: crate::paths::tool_cache_path(&profile_name),
            profile_path: crate::paths::profile_path(&profile_name),
            profile_name,
            profile_store,
            profile: RwLock::new(profile),
            catalogs: RwLock::new(HashMap::new()),
            all_tools: RwLock::new(Vec::new()),
            tool_to_server: RwLock::new(HashMap::new()),
            pool,
            health,
            discovery,
            semantic_index,
            introspector,
            denylist: crate::auto_import::DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            state: RwLock::new(OrchestratorState::Cold),
            cancel: CancellationToken::new(),
            background_task: Mutex::new(None),
        }))
    }

    /// Returns immediately: spawns background initialization and a
    /// profile-file watcher for hot-reload, and returns without waiting for
    /// either. Calling this more than once is a no-op.
    pub async fn initialize(self: &Arc<Self>) {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Cold {
                return;
            }
            *state = OrchestratorState::Warming;
        }

        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run_background_initialization().await });
        *self.background_task.lock().await = Some(handle);

        let reloader = self.clone();
        watcher::watch_profile(self.profile_path.clone(), self.cancel.clone(), move || {
            let reloader = reloader.clone();
            tokio::spawn(async move { reloader.reindex().await });
        });
    }

    /// Current lifecycle phase, surfaced so a caller (e.g. a CLI status
    /// command) can tell "not yet ready" apart from "ready, but empty".
    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == OrchestratorState::Ready
    }

    async fn run_background_initialization(self: Arc<Self>) {
        if std::env::var("NCP_DISABLE_BACKGROUND_INIT").as_deref() == Ok("true") {
            *self.state.write().await = OrchestratorState::Ready;
            return;
        }
        self.do_background_work().await;
        *self.state.write().await = OrchestratorState::Ready;
    }

    /// Re-runs initialization in response to a profile hot-reload. Unlike
    /// the startup path this does not gate on `OrchestratorState::Cold`, so
    /// it can fire after the gateway is already serving traffic.
    async fn reindex(self: Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        *self.state.write().await = OrchestratorState::Warming;
        self.do_background_work().await;
        *self.state.write().await = OrchestratorState::Ready;
        tracing::info!(profile = %self.profile_name, "profile reloaded");
    }

    async fn do_background_work(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut profile = self
            .profile_store
            .get_profile(&self.profile_name)
            .unwrap_or_else(|_| Profile::new(&self.profile_name, None));
        let outcome = run_auto_import(&mut profile, self.introspector.as_ref(), &self.denylist).await;
        if !outcome.imported.is_empty() {
            tracing::info!(imported = ?outcome.imported, "auto-imported servers from upstream client config");
            if let Err(error) = self.profile_store.save(&profile) {
                tracing::warn!(%error, "failed to persist auto-imported profile");
            }
        }
        if outcome.timed_out {
            tracing::warn!("auto-import timed out; continuing with the servers already configured");
        }
        *self.profile.write().await = profile.clone();

        let hash = config_hash(&profile);

        let catalogs = match ToolsCacheFile::load_if_matching(&self.cache_path, &hash) {
            Some(cache) => {
                tracing::debug!(profile = %self.profile_name, "tool cache hit, skipping probe");
                cache.mcps
            }
            None => self.probe_all(&profile).await,
        };

        if self.cancel.is_cancelled() {
            return;
        }

        if let Err(error) = ToolsCacheFile::new(hash.clone(), catalogs.clone()).persist(&self.cache_path) {
            tracing::warn!(%error, "failed to persist tool cache");
        }

        let mut all_tools = Vec::new();
        let mut tool_to_server = HashMap::new();
        let mut names: Vec<&String> = catalogs.keys().collect();
        names.sort();
        for name in names {
            let catalog = &catalogs[name];
            for tool in &catalog.tools {
                tool_to_server.insert(tool.display_name.clone(), name.clone());
            }
            all_tools.extend(catalog.tools.clone());
        }

        if let Err(error) = self.semantic_index.rebuild(&all_tools, &hash) {
            tracing::warn!(%error, "failed to rebuild semantic index");
        }

        *self.catalogs.write().await = catalogs;
        *self.all_tools.write().await = all_tools;
        *self.tool_to_server.write().await = tool_to_server;
    }

    async fn probe_all(&self, profile: &Profile) -> HashMap<String, ToolCatalog> {
        let semaphore = Arc::new(Semaphore::new(BACKGROUND_PROBE_CONCURRENCY));
        let mut handles = Vec::new();
        for (name, config) in profile.mcp_servers.clone() {
            let pool = self.pool.clone();
            let health = self.health.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let catalog = probe_one(&pool, &health, &name, &config).await;
                (name, catalog)
            }));
        }

        let mut catalogs = HashMap::with_capacity(handles.len());
        for handle in handles {
            if let Ok((name, catalog)) = handle.await {
                catalogs.insert(name, catalog);
            }
        }
        catalogs
    }

    /// Discovery Engine passthrough (spec §4.7 point 2): ranks `allTools`
    /// against `description`, falling back to a plain listing when it is
    /// empty.
    pub async fn find(
        &self,
        description: &str,
        limit: usize,
        detailed: bool,
        confidence_threshold: Option<f32>,
    ) -> Vec<Candidate> {
        let tools = self.all_tools.read().await.clone();
        let threshold = confidence_threshold.unwrap_or(self.confidence_threshold);
        self.discovery
            .find_relevant_tools(&tools, description, limit, detailed, threshold)
            .await
    }

    /// Executes a tool by its `<server>:<rawName>` display name (spec §4.7
    /// point 3): resolves ownership, checks the Health Tracker, validates
    /// required parameters against the cached schema, then forwards the
    /// call through the Connection Pool.
    pub async fn run(
        &self,
        display_name: &str,
        args: Value,
        meta: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let (server_name, raw_name) = crate::catalog::split_display_name(display_name)
            .ok_or_else(|| GatewayError::InvalidToolFormat(display_name.to_string()))?;

        match self.tool_to_server.read().await.get(display_name) {
            Some(owner) if owner == server_name => {}
            _ => return Err(GatewayError::NotFound(display_name.to_string())),
        }

        if self.health.is_disabled(server_name).await {
            return Err(GatewayError::Disabled(server_name.to_string()));
        }

        let config = {
            let profile = self.profile.read().await;
            profile
                .mcp_servers
                .get(server_name)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(display_name.to_string()))?
        };

        if let Some(tool) = self.tool_def(display_name).await {
            validate_required_params(&tool, &args)?;
        }

        let connection = self.pool.get_or_create(server_name, &config).await?;
        let result = connection.call_tool(raw_name, args, meta).await;
        match &result {
            Ok(_) => {
                let _ = self.health.mark_healthy(server_name).await;
            }
            Err(error) => {
                let _ = self.health.mark_unhealthy(server_name, error.to_string()).await;
            }
        }
        result
    }

    async fn tool_def(&self, display_name: &str) -> Option<ToolDef> {
        self.all_tools
            .read()
            .await
            .iter()
            .find(|t| t.display_name == display_name)
            .cloned()
    }

    /// Deadline-bounded union of `resources/list` across every configured,
    /// healthy server (spec §4.7 point 4). A server that times out or
    /// errors contributes nothing; it never fails the whole call.
    pub async fn get_all_resources(&self) -> Vec<ResourceEntry> {
        let servers = self.enabled_healthy_servers().await;
        let mut handles = Vec::with_capacity(servers.len());
        for (name, config) in servers {
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let attempt = async {
                    let connection = pool.get_or_create(&name, &config).await.ok()?;
                    connection.list_resources().await.ok()
                };
                let resources = tokio::time::timeout(PER_SERVER_AGGREGATION_TIMEOUT, attempt)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                (name, resources)
            }));
        }

        let mut out = Vec::new();
        for (server, resources) in join_within_deadline(handles).await {
            out.extend(resources.into_iter().map(|resource| ResourceEntry {
                uri: resource.uri.to_string(),
                name: resource.name.to_string(),
                mime_type: resource.mime_type.as_ref().map(|m| m.to_string()),
                server: server.clone(),
            }));
        }
        out
    }

    /// Deadline-bounded union of `prompts/list` across every configured,
    /// healthy server (spec §4.7 point 4).
    pub async fn get_all_prompts(&self) -> Vec<PromptEntry> {
        let servers = self.enabled_healthy_servers().await;
        let mut handles = Vec::with_capacity(servers.len());
        for (name, config) in servers {
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let attempt = async {
                    let connection = pool.get_or_create(&name, &config).await.ok()?;
                    connection.list_prompts().await.ok()
                };
                let prompts = tokio::time::timeout(PER_SERVER_AGGREGATION_TIMEOUT, attempt)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                (name, prompts)
            }));
        }

        let mut out = Vec::new();
        for (server, prompts) in join_within_deadline(handles).await {
            out.extend(prompts.into_iter().map(|prompt| PromptEntry {
                name: prompt.name.to_string(),
                description: prompt.description.as_ref().map(|d| d.to_string()),
                server: server.clone(),
            }));
        }
        out
    }

    /// Reads a resource by `<server>:<uri>`, or a bare upstream-style URI
    /// matched against whichever single server currently owns it.
    pub async fn read_resource(&self, server_name: &str, uri: &str) -> Result<Value, GatewayError> {
        let config = {
            let profile = self.profile.read().await;
            profile
                .mcp_servers
                .get(server_name)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(server_name.to_string()))?
        };
        if self.health.is_disabled(server_name).await {
            return Err(GatewayError::Disabled(server_name.to_string()));
        }
        let connection = self.pool.get_or_create(server_name, &config).await?;
        connection.read_resource(uri).await
    }

    /// Fetches a prompt by `<server>:<promptName>`.
    pub async fn get_prompt(
        &self,
        server_name: &str,
        prompt_name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let config = {
            let profile = self.profile.read().await;
            profile
                .mcp_servers
                .get(server_name)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(server_name.to_string()))?
        };
        if self.health.is_disabled(server_name).await {
            return Err(GatewayError::Disabled(server_name.to_string()));
        }
        let connection = self.pool.get_or_create(server_name, &config).await?;
        connection.get_prompt(prompt_name, arguments).await
    }

    async fn enabled_healthy_servers(&self) -> Vec<(String, ServerConfig)> {
        let (names, configs): (Vec<String>, Vec<(String, ServerConfig)>) = {
            let profile = self.profile.read().await;
            let enabled: Vec<(String, ServerConfig)> = profile
                .mcp_servers
                .iter()
                .filter(|(_, config)| config.enabled())
                .map(|(name, config)| (name.clone(), config.clone()))
                .collect();
            (enabled.iter().map(|(n, _)| n.clone()).collect(), enabled)
        };
        let healthy: std::collections::HashSet<String> =
            self.health.filter_healthy(&names).await.into_iter().cloned().collect();
        configs.into_iter().filter(|(name, _)| healthy.contains(name)).collect()
    }

    pub async fn health_report(&self) -> HealthReport {
        self.health.generate_report().await
    }

    /// Tears down the background watcher and every live downstream
    /// connection. Safe to call once during shutdown.
    pub async fn cleanup(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.background_task.lock().await.take() {
            handle.abort();
        }
        self.pool.shutdown().await;
    }
}

/// Drains a set of already-spawned tasks as they complete, but never past
/// `GLOBAL_AGGREGATION_DEADLINE` from the moment this is called. Tasks still
/// outstanding at the deadline are abandoned in place (they keep running to
/// populate health/connection state, their output is simply not waited on)
/// rather than aborted, so a slow downstream probe doesn't get cut off
/// mid-request.
async fn join_within_deadline<T: Send + 'static>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
    let mut pending: FuturesUnordered<_> = handles.into_iter().collect();
    let mut out = Vec::with_capacity(pending.len());
    let deadline = tokio::time::sleep(GLOBAL_AGGREGATION_DEADLINE);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = pending.next() => match next {
                Some(Ok(value)) => out.push(value),
                Some(Err(_)) => {}
                None => break,
            },
        }
    }
    out
}

async fn probe_one(pool: &ConnectionPool, health: &HealthTracker, name: &str, config: &ServerConfig) -> ToolCatalog {
    if !config.enabled() {
        return ToolCatalog::default();
    }

    let probed_at = now_unix_ms();
    let attempt = async {
        let connection = pool.get_or_create(name, config).await?;
        connection.list_tools().await
    };

    match tokio::time::timeout(crate::pool::PROBE_TIMEOUT, attempt).await {
        Ok(Ok(tools)) => {
            let _ = health.mark_healthy(name).await;
            ToolCatalog {
                tools,
                last_probed_at_unix_ms: Some(probed_at),
                probe_status: ProbeStatus::Ok,
            }
        }
        Ok(Err(error)) => {
            let _ = health.mark_unhealthy(name, error.to_string()).await;
            ToolCatalog {
                tools: Vec::new(),
                last_probed_at_unix_ms: Some(probed_at),
                probe_status: ProbeStatus::Failed,
            }
        }
        Err(_) => {
            let _ = health.mark_unhealthy(name, "probe timed out").await;
            ToolCatalog {
                tools: Vec::new(),
                last_probed_at_unix_ms: Some(probed_at),
                probe_status: ProbeStatus::Failed,
            }
        }
    }
}

/// Checks every name in the tool's JSON Schema `required` array is present
/// in `args`; does not validate types, only presence (spec §4.7 point 3).
fn validate_required_params(tool: &ToolDef, args: &Value) -> Result<(), GatewayError> {
    let Some(required) = tool.input_schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let provided = args.as_object();
    for key in required {
        let Some(key) = key.as_str() else { continue };
        let present = provided.map(|object| object.contains_key(key)).unwrap_or(false);
        if !present {
            return Err(GatewayError::InvalidParams(format!(
                "missing required parameter '{key}' for tool '{}'",
                tool.display_name
            )));
        }
    }
    Ok(())
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_import::NullIntrospector;
    use crate::discovery::DeterministicEmbedder;
    use serial_test::serial;
    use tempfile::tempdir;

    async fn orchestrator_in(root: &std::path::Path) -> Arc<Orchestrator> {
        std::env::set_var("NCP_CONFIG_PATH", root);
        std::env::set_var("NCP_DISABLE_BACKGROUND_INIT", "true");
        let orchestrator = Orchestrator::new("all", Arc::new(DeterministicEmbedder::new()), Arc::new(NullIntrospector))
            .await
            .unwrap();
        orchestrator
    }

    #[tokio::test]
    #[serial]
    async fn fresh_orchestrator_starts_cold_with_no_tools() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path()).await;
        assert!(!orchestrator.is_ready().await);
        assert!(orchestrator.all_tools.read().await.is_empty());
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn initialize_with_background_init_disabled_becomes_ready_without_probing() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path()).await;
        orchestrator.initialize().await;

        for _ in 0..20 {
            if orchestrator.is_ready().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(orchestrator.is_ready().await);
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn run_on_unknown_tool_name_returns_not_found() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path()).await;
        let result = orchestrator.run("ghost:do_thing", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn run_on_malformed_display_name_returns_invalid_format() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path()).await;
        let result = orchestrator.run("no-colon-here", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(GatewayError::InvalidToolFormat(_))));
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[tokio::test]
    #[serial]
    async fn find_with_empty_catalog_returns_empty() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path()).await;
        let candidates = orchestrator.find("read a file", 10, false, None).await;
        assert!(candidates.is_empty());
        std::env::remove_var("NCP_CONFIG_PATH");
        std::env::remove_var("NCP_DISABLE_BACKGROUND_INIT");
    }

    #[test]
    fn validate_required_params_flags_missing_key() {
        let tool = ToolDef::new(
            "fs",
            "read_file",
            "Reads a file",
            serde_json::json!({"type": "object", "required": ["path"]}),
        );
        let err = validate_required_params(&tool, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(message) if message.contains("path")));
    }

    #[test]
    fn validate_required_params_accepts_present_key() {
        let tool = ToolDef::new(
            "fs",
            "read_file",
            "Reads a file",
            serde_json::json!({"type": "object", "required": ["path"]}),
        );
        assert!(validate_required_params(&tool, &serde_json::json!({"path": "/tmp/x"})).is_ok());
    }

    #[test]
    fn validate_required_params_with_no_required_array_is_a_no_op() {
        let tool = ToolDef::new("fs", "read_file", "Reads a file", serde_json::json!({"type": "object"}));
        assert!(validate_required_params(&tool, &serde_json::json!({})).is_ok());
    }
}
