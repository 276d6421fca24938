//! Health Tracker (spec §4.3): per-server health state, persisted across
//! restarts so a server that was disabled for repeated failures stays
//! disabled until an operator re-enables it.
//!
//! Grounded on the teacher's `mcp_routing::registry` bookkeeping pattern
//! (an in-memory map guarded by `tokio::sync::RwLock`, entries carrying a
//! counter and a timestamp) generalized from TTL tool eviction to a
//! healthy/unhealthy/disabled state machine, plus the teacher's
//! `McpServerConfig::health_check` field as the precedent for persisting
//! health alongside config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures before a server is automatically disabled.
pub const MAX_ERROR_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub state: HealthState,
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_unix_ms: Option<u64>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            error_count: 0,
            last_error: None,
            last_checked_unix_ms: None,
        }
    }
}

impl HealthRecord {
    fn recommendation(&self) -> Option<String> {
        let message = self.last_error.as_deref()?;
        let lower = message.to_lowercase();
        if lower.contains("404") {
            Some("the server returned HTTP 404 — try reinstalling the package".to_string())
        } else if lower.contains("eacces") {
            Some("permission denied launching the command — check file permissions".to_string())
        } else if lower.contains("enoent") || lower.contains("command not found") {
            Some("command not found — check that it is installed and on PATH".to_string())
        } else {
            None
        }
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single health report entry, as returned by `generate_report`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReportEntry {
    pub server: String,
    pub state: HealthState,
    pub error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// The aggregate shape of `generateReport()` (spec §4.3): per-state counts
/// plus the full per-server breakdown and the distinct set of actionable
/// recommendations across every server currently showing one.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub total_servers: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub disabled: usize,
    pub timestamp_unix_ms: u64,
    pub details: Vec<HealthReportEntry>,
    pub recommendations: Vec<String>,
}

/// Tracks per-server health in memory, backed by a JSON file at `path`.
/// Shared across the Orchestrator and Connection Pool via `Arc`.
pub struct HealthTracker {
    path: PathBuf,
    records: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthTracker {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn load(path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let records = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Arc::new(Self {
            path,
            records: RwLock::new(records),
        }))
    }

    async fn persist(&self, records: &HashMap<String, HealthRecord>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, server: &str) -> HealthRecord {
        self.records
            .read()
            .await
            .get(server)
            .cloned()
            .unwrap_or_default()
    }

    /// Resets the error count and marks the server healthy. Does not
    /// override an explicit `Disabled` state set by an operator or a prior
    /// auto-disable — call `enable` to clear that.
    pub async fn mark_healthy(&self, server: &str) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let record = records.entry(server.to_string()).or_default();
        if record.state != HealthState::Disabled {
            record.state = HealthState::Healthy;
            record.error_count = 0;
            record.last_error = None;
        }
        record.last_checked_unix_ms = Some(now_unix_ms());
        let snapshot = records.clone();
        drop(records);
        self.persist(&snapshot).await
    }

    /// Records a failure. Auto-disables the server once `error_count`
    /// reaches [`MAX_ERROR_COUNT`].
    pub async fn mark_unhealthy(&self, server: &str, error: impl Into<String>) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let record = records.entry(server.to_string()).or_default();
        record.error_count = record.error_count.saturating_add(1);
        record.last_error = Some(error.into());
        record.last_checked_unix_ms = Some(now_unix_ms());
        record.state = if record.error_count >= MAX_ERROR_COUNT {
            HealthState::Disabled
        } else {
            HealthState::Unhealthy
        };
        let snapshot = records.clone();
        drop(records);
        self.persist(&snapshot).await
    }

    pub async fn disable(&self, server: &str) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let record = records.entry(server.to_string()).or_default();
        record.state = HealthState::Disabled;
        let snapshot = records.clone();
        drop(records);
        self.persist(&snapshot).await
    }

    /// Clears a disabled server back to `Unknown` with a reset error count,
    /// so it is retried on the next connection attempt.
    pub async fn enable(&self, server: &str) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let record = records.entry(server.to_string()).or_default();
        record.state = HealthState::Unknown;
        record.error_count = 0;
        record.last_error = None;
        let snapshot = records.clone();
        drop(records);
        self.persist(&snapshot).await
    }

    /// Given the set of servers configured in the active profile, returns
    /// the ones in state `Healthy` or `Unknown` — `Disabled` and `Unhealthy`
    /// servers are removed. Note this is stricter than the `run` path, which
    /// only blocks `Disabled` servers and tolerates `Unhealthy` ones.
    pub async fn filter_healthy<'a>(&self, servers: &'a [String]) -> Vec<&'a String> {
        let records = self.records.read().await;
        servers
            .iter()
            .filter(|name| {
                records
                    .get(*name)
                    .map(|r| matches!(r.state, HealthState::Healthy | HealthState::Unknown))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Used by the `run` path: only `Disabled` blocks execution.
    pub async fn is_disabled(&self, server: &str) -> bool {
        self.records
            .read()
            .await
            .get(server)
            .map(|r| r.state == HealthState::Disabled)
            .unwrap_or(false)
    }

    pub async fn generate_report(&self) -> HealthReport {
        let records = self.records.read().await;
        let mut details: Vec<HealthReportEntry> = records
            .iter()
            .map(|(server, record)| HealthReportEntry {
                server: server.clone(),
                state: record.state,
                error_count: record.error_count,
                last_error: record.last_error.clone(),
                recommendation: record.recommendation(),
            })
            .collect();
        details.sort_by(|a, b| a.server.cmp(&b.server));

        let mut recommendations: Vec<String> = details.iter().filter_map(|e| e.recommendation.clone()).collect();
        recommendations.sort();
        recommendations.dedup();

        let count = |state: HealthState| details.iter().filter(|e| e.state == state).count();
        HealthReport {
            total_servers: details.len(),
            healthy: count(HealthState::Healthy) + count(HealthState::Unknown),
            unhealthy: count(HealthState::Unhealthy),
            disabled: count(HealthState::Disabled),
            timestamp_unix_ms: now_unix_ms(),
            details,
            recommendations,
        }
    }
}
