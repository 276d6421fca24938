//! Profile config-hash (spec's `metadata.configHash`): invalidates the
//! Semantic Index and tool cache when the set of configured servers changes.
//!
//! Grounded on the teacher's `sync::directory_hasher::DirectoryHasher`
//! (`Sha256` over a deterministic byte stream, `format!("{:x}", ...)`
//! rendering without an extra hex crate dependency), generalized from
//! hashing files on disk to hashing a Profile's `mcpServers` map.

use crate::profile::Profile;
use sha2::{Digest, Sha256};

/// Stable hash of a profile's server configuration, independent of
/// `HashMap` iteration order.
pub fn config_hash(profile: &Profile) -> String {
    let mut names: Vec<&String> = profile.mcp_servers.keys().collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in names {
        let config = &profile.mcp_servers[name];
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(serde_json::to_vec(config).unwrap_or_default());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ServerConfig;

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
    fn hash_is_stable_regardless_of_insertion_order() {
        let mut a = Profile::new("all", None);
        a.mcp_servers.insert("fs".into(), subprocess("npx"));
        a.mcp_servers.insert("git".into(), subprocess("uvx"));

        let mut b = Profile::new("all", None);
        b.mcp_servers.insert("git".into(), subprocess("uvx"));
        b.mcp_servers.insert("fs".into(), subprocess("npx"));

        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn hash_changes_when_a_server_is_added() {
        let mut a = Profile::new("all", None);
        a.mcp_servers.insert("fs".into(), subprocess("npx"));
        let before = config_hash(&a);

        a.mcp_servers.insert("git".into(), subprocess("uvx"));
        let after = config_hash(&a);

        assert_ne!(before, after);
    }

    #[test]
    fn empty_profiles_hash_identically_regardless_of_name() {
        let a = Profile::new("all", None);
        let b = Profile::new("other", None);
        assert_eq!(config_hash(&a), config_hash(&b));
    }
}
