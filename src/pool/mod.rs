//! Connection Pool (spec §4.6): owns every live downstream connection,
//! enforcing capacity, execution-count, and idle-timeout policies.
//!
//! Grounded on the teacher's `mcp_routing::pool::McpConnectionPool` (a
//! `RwLock<HashMap<String, Arc<McpServerHandle>>>`, `ensure_handle`
//! double-checked-locking pattern), generalized with the LRU/quiescence
//! eviction and execution-count rollover the teacher's pool never needed
//! (it held one handle per configured server, unbounded).

mod connection;
pub mod oauth;
mod transport;

pub use connection::{ConnState, Connection};

use crate::error::GatewayError;
use crate::health::HealthTracker;
use crate::profile::ServerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const MAX_CONNECTIONS: usize = 50;
pub const MAX_EXECUTIONS_PER_CONNECTION: u64 = 1000;
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ConnectionPool {
    handles: Mutex<HashMap<String, Arc<Connection>>>,
    health: Arc<HealthTracker>,
    max_connections: usize,
}

impl ConnectionPool {
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            health,
            max_connections: MAX_CONNECTIONS,
        }
    }

    #[cfg(test)]
    pub fn with_max_connections(health: Arc<HealthTracker>, max_connections: usize) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            health,
            max_connections,
        }
    }

    /// Returns the existing connection for `server_name`, replacing it first
    /// if it has exceeded `MAX_EXECUTIONS_PER_CONNECTION`, or creates a fresh
    /// one — evicting the oldest quiescent connection first if the pool is
    /// at capacity. Failure marks the server unhealthy.
    pub async fn get_or_create(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<Connection>, GatewayError> {
        if self.health.is_disabled(server_name).await {
            return Err(GatewayError::Disabled(server_name.to_string()));
        }

        {
            let handles = self.handles.lock().await;
            if let Some(existing) = handles.get(server_name) {
                if existing.execution_count() < MAX_EXECUTIONS_PER_CONNECTION {
                    return Ok(existing.clone());
                }
            }
        }

        let mut handles = self.handles.lock().await;
        if let Some(existing) = handles.get(server_name) {
            if existing.execution_count() < MAX_EXECUTIONS_PER_CONNECTION {
                return Ok(existing.clone());
            }
            let stale = handles.remove(server_name).unwrap();
            drop(handles);
            stale.disconnect().await;
            handles = self.handles.lock().await;
        }

        if handles.len() >= self.max_connections {
            evict_oldest_quiescent(&mut handles).await.ok_or_else(|| GatewayError::Connect {
                server: server_name.to_string(),
                message: "connection pool is full and every connection is in flight".to_string(),
            })?;
        }

        let connection = match Connection::connect(server_name, config, CONNECT_TIMEOUT).await {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                let _ = self.health.mark_unhealthy(server_name, err.to_string()).await;
                return Err(err);
            }
        };
        handles.insert(server_name.to_string(), connection.clone());
        Ok(connection)
    }

    /// No-op release hook: connections are kept warm until idle-swept or
    /// evicted, matching the spec's `release(serverName)` signature without
    /// forcing a teardown on every call.
    pub async fn release(&self, _server_name: &str) {}

    pub async fn disconnect(&self, server_name: &str) {
        let removed = self.handles.lock().await.remove(server_name);
        if let Some(connection) = removed {
            connection.disconnect().await;
        }
    }

    /// Disconnects every connection whose idle time exceeds `IDLE_TIMEOUT`
    /// and is not currently serving a request.
    pub async fn cleanup_idle(&self) {
        let stale: Vec<Arc<Connection>> = {
            let mut handles = self.handles.lock().await;
            let stale_names: Vec<String> = handles
                .iter()
                .filter(|(_, c)| !c.is_in_flight() && c.idle_for() > IDLE_TIMEOUT)
                .map(|(name, _)| name.clone())
                .collect();
            stale_names
                .into_iter()
                .filter_map(|name| handles.remove(&name))
                .collect()
        };
        for connection in stale {
            connection.disconnect().await;
        }
    }

    pub async fn shutdown(&self) {
        let all: Vec<Arc<Connection>> = self.handles.lock().await.drain().map(|(_, c)| c).collect();
        for connection in all {
            connection.disconnect().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }
}

async fn evict_oldest_quiescent(handles: &mut HashMap<String, Arc<Connection>>) -> Option<()> {
    let victim = handles
        .iter()
        .filter(|(_, c)| !c.is_in_flight())
        .min_by_key(|(_, c)| c.last_used_marker())
        .map(|(name, _)| name.clone())?;

    let connection = handles.remove(&victim)?;
    connection.disconnect().await;
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn pool_with_capacity(capacity: usize) -> ConnectionPool {
        let (pool, _health) = pool_and_health_with_capacity(capacity).await;
        pool
    }

    async fn pool_and_health_with_capacity(capacity: usize) -> (ConnectionPool, Arc<HealthTracker>) {
        let dir = tempdir().unwrap();
        let health = HealthTracker::load(dir.path().join("health.json")).await.unwrap();
        std::mem::forget(dir);
        (ConnectionPool::with_max_connections(health.clone(), capacity), health)
    }

    #[tokio::test]
    async fn new_pool_is_empty() {
        let pool = pool_with_capacity(50).await;
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn connect_to_nonexistent_command_marks_unhealthy_and_errors() {
        let pool = pool_with_capacity(50).await;
        let config = ServerConfig::Subprocess {
            command: "this-binary-does-not-exist-xyz".to_string(),
            args: vec![],
            env: Default::default(),
            description: None,
            enabled: None,
        };
        let result = pool.get_or_create("flaky", &config).await;
        assert!(result.is_err());
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn get_or_create_refuses_a_disabled_server() {
        let (pool, health) = pool_and_health_with_capacity(50).await;
        health.disable("quarantined").await.unwrap();
        let config = ServerConfig::Subprocess {
            command: "this-binary-does-not-exist-xyz".to_string(),
            args: vec![],
            env: Default::default(),
            description: None,
            enabled: None,
        };
        let result = pool.get_or_create("quarantined", &config).await;
        assert!(matches!(result, Err(GatewayError::Disabled(_))));
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn disconnect_of_unknown_server_is_a_no_op() {
        let pool = pool_with_capacity(50).await;
        pool.disconnect("never-existed").await;
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn shutdown_on_empty_pool_is_a_no_op() {
        let pool = pool_with_capacity(50).await;
        pool.shutdown().await;
        assert_eq!(pool.len().await, 0);
    }
}
