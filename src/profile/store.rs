//! Persistence for [`Profile`]s: one JSON file per profile under
//! `profiles_dir()`, written atomically and guarded by an advisory lock file.
//!
//! Grounded on the teacher's `McpConfigManager`/`ConfigLock` (write-to-temp +
//! rename, `create_new` lock file with stale-lock detection by file age), but
//! generalized from a single global config to a named multi-profile store.

use crate::error::GatewayError;
use crate::profile::validate::validate_subprocess_config;
use crate::profile::{Profile, ServerConfig};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const LOCK_RETRY_COUNT: usize = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);
const LOCK_STALE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AddServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("server '{0}' already exists in this profile")]
    AlreadyExists(String),
}

/// Reads and writes `Profile`s under a config root (normally
/// `paths::config_dir()`, overridable in tests).
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn default_at_config_dir() -> Self {
        Self::new(crate::paths::config_dir())
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir().join(format!("{name}.json"))
    }

    /// Loads a profile, creating an empty one in memory (not yet persisted)
    /// if the file does not exist.
    pub fn get_profile(&self, name: &str) -> Result<Profile, GatewayError> {
        let path = self.profile_path(name);
        if !path.exists() {
            return Ok(Profile::new(name, None));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| GatewayError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn list_profiles(&self) -> Result<Vec<String>, GatewayError> {
        let dir = self.profiles_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir)
            .map_err(|e| GatewayError::Config(format!("reading {}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| GatewayError::Config(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn get_default_profile_name(&self) -> String {
        crate::paths::default_profile_name()
    }

    pub fn create_profile(&self, name: &str, description: Option<String>) -> Result<Profile, GatewayError> {
        let path = self.profile_path(name);
        if path.exists() {
            return self.get_profile(name);
        }
        let profile = Profile::new(name, description);
        self.save(&profile)?;
        Ok(profile)
    }

    /// Adds a new server entry to the named profile. Validates `Subprocess`
    /// configs for shell metacharacters and `Remote` configs for URL scheme
    /// before persisting; rejects a `server_name` already present in the
    /// profile rather than silently overwriting it.
    pub fn add_server(
        &self,
        profile_name: &str,
        server_name: &str,
        config: ServerConfig,
    ) -> Result<Profile, AddServerError> {
        match &config {
            ServerConfig::Subprocess { command, args, .. } => {
                validate_subprocess_config(command, args)?;
            }
            ServerConfig::Remote { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(AddServerError::Gateway(GatewayError::Validation(format!(
                        "remote server url must use http or https scheme, got '{url}'"
                    ))));
                }
            }
        }

        let mut profile = self.get_profile(profile_name)?;
        if profile.mcp_servers.contains_key(server_name) {
            return Err(AddServerError::AlreadyExists(server_name.to_string()));
        }
        profile
            .mcp_servers
            .insert(server_name.to_string(), config);
        self.save(&profile)?;
        Ok(profile)
    }

    pub fn remove_server(
        &self,
        profile_name: &str,
        server_name: &str,
    ) -> Result<Profile, GatewayError> {
        let mut profile = self.get_profile(profile_name)?;
        profile.mcp_servers.remove(server_name);
        self.save(&profile)?;
        Ok(profile)
    }

    pub fn save(&self, profile: &Profile) -> Result<(), GatewayError> {
        let dir = self.profiles_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| GatewayError::Config(format!("creating {}: {e}", dir.display())))?;

        let path = self.profile_path(&profile.name);
        let _lock = ProfileLock::acquire(&path)
            .map_err(|e| GatewayError::Config(format!("locking {}: {e}", path.display())))?;

        let content = serde_json::to_string_pretty(profile)
            .map_err(|e| GatewayError::Config(format!("serializing profile: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &content)
            .map_err(|e| GatewayError::Config(format!("writing {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| GatewayError::Config(format!("renaming into {}: {e}", path.display())))?;
        Ok(())
    }
}

/// Advisory lock file held for the duration of a profile write, so two
/// `ncp` processes racing to save the same profile don't interleave writes.
struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    fn acquire(config_path: &Path) -> std::io::Result<Self> {
        let lock_path = config_path.with_extension("json.lock");

        for _ in 0..=LOCK_RETRY_COUNT {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "pid={}", process::id());
                    return Ok(Self { path: lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_path) {
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "profile is locked by another process",
        ))
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO)
                > LOCK_STALE
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::RemoteTransport;
    use tempfile::tempdir;

    fn subprocess(command: &str) -> ServerConfig {
        ServerConfig::Subprocess {
            command: command.to_string(),
            args: vec![],
            env: Default::default(),
            description: None,
            enabled: None,
        }
    }

    #[test]
    fn missing_profile_loads_as_empty() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let profile = store.get_profile("all").unwrap();
        assert_eq!(profile.name, "all");
        assert!(profile.mcp_servers.is_empty());
    }

    #[test]
    fn add_server_persists_and_round_trips() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        store
            .add_server("all", "fs", subprocess("npx"))
            .unwrap();

        let reloaded = store.get_profile("all").unwrap();
        assert!(reloaded.mcp_servers.contains_key("fs"));
    }

    #[test]
    fn add_server_rejects_injection() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let config = ServerConfig::Subprocess {
            command: "echo".into(),
            args: vec!["; rm -rf /".into()],
            env: Default::default(),
            description: None,
            enabled: None,
        };
        let err = store.add_server("all", "bad", config).unwrap_err();
        assert!(matches!(err, AddServerError::Gateway(GatewayError::Validation(_))));
    }

    #[test]
    fn remove_server_updates_persisted_profile() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        store.add_server("all", "fs", subprocess("npx")).unwrap();
        store.remove_server("all", "fs").unwrap();

        let reloaded = store.get_profile("all").unwrap();
        assert!(!reloaded.mcp_servers.contains_key("fs"));
    }

    #[test]
    fn list_profiles_reflects_created_profiles() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        store.create_profile("all", None).unwrap();
        store.create_profile("work", Some("work tools".into())).unwrap();

        let mut names = store.list_profiles().unwrap();
        names.sort();
        assert_eq!(names, vec!["all".to_string(), "work".to_string()]);
    }

    #[test]
    fn add_server_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        store.add_server("all", "fs", subprocess("npx")).unwrap();
        let err = store.add_server("all", "fs", subprocess("npx")).unwrap_err();
        assert!(matches!(err, AddServerError::AlreadyExists(name) if name == "fs"));
    }

    #[test]
    fn add_server_rejects_non_http_remote_scheme() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let config = ServerConfig::Remote {
            url: "ftp://example.com/mcp".into(),
            transport: RemoteTransport::Http,
            auth: Default::default(),
            description: None,
            enabled: None,
        };
        let err = store.add_server("all", "bad-remote", config).unwrap_err();
        assert!(matches!(err, AddServerError::Gateway(GatewayError::Validation(_))));
    }

    #[test]
    fn remote_server_config_round_trips() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        let config = ServerConfig::Remote {
            url: "https://example.com/mcp".into(),
            transport: RemoteTransport::Sse,
            auth: Default::default(),
            description: None,
            enabled: None,
        };
        store.add_server("all", "remote1", config).unwrap();

        let profile = store.get_profile("all").unwrap();
        match &profile.mcp_servers["remote1"] {
            ServerConfig::Remote { transport, .. } => assert_eq!(*transport, RemoteTransport::Sse),
            _ => panic!("expected remote config"),
        }
    }
}
