//! Auto-Importer: a one-shot, parallel, deduplicated import of
//! downstream-server configs from whichever upstream MCP client launched
//! this process.

mod introspector;

pub use introspector::{NullIntrospector, UpstreamIntrospector, UpstreamServerConfig};

use crate::profile::{Profile, ServerConfig};
use std::collections::HashSet;
use std::time::Duration;

pub const AUTO_IMPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Server names treated as "the gateway itself" and skipped during import.
/// A substring match against this configurable list, rather than a single
/// hard-coded name.
pub const DEFAULT_DENYLIST: &[&str] = &["ncp"];

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub imported: Vec<String>,
    pub skipped_denylisted: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub timed_out: bool,
}

impl ImportOutcome {
    fn empty() -> Self {
        Self {
            imported: Vec::new(),
            skipped_denylisted: Vec::new(),
            already_present: Vec::new(),
            failed: Vec::new(),
            timed_out: false,
        }
    }
}

fn is_denylisted(name: &str, denylist: &[String]) -> bool {
    let lower = name.to_ascii_lowercase();
    denylist.iter().any(|blocked| lower.contains(&blocked.to_ascii_lowercase()))
}

/// Augments `profile` in place with any downstream servers the upstream
/// client's own catalog names that are not already present and are not
/// denylisted, bounded overall by `AUTO_IMPORT_TIMEOUT`.
pub async fn run_auto_import(
    profile: &mut Profile,
    introspector: &dyn UpstreamIntrospector,
    denylist: &[String],
) -> ImportOutcome {
    let discovery = tokio::time::timeout(AUTO_IMPORT_TIMEOUT, introspector.discover_servers());

    let discovered = match discovery.await {
        Ok(Ok(servers)) => servers,
        Ok(Err(_)) => return ImportOutcome::empty(),
        Err(_) => {
            let mut outcome = ImportOutcome::empty();
            outcome.timed_out = true;
            return outcome;
        }
    };

    let mut outcome = ImportOutcome::empty();
    let mut seen: HashSet<String> = profile.mcp_servers.keys().cloned().collect();

    for (name, raw_config) in discovered {
        if is_denylisted(&name, denylist) {
            outcome.skipped_denylisted.push(name);
            continue;
        }
        if seen.contains(&name) {
            outcome.already_present.push(name);
            continue;
        }
        match ServerConfig::try_from(raw_config) {
            Ok(config) => {
                profile.mcp_servers.insert(name.clone(), config);
                seen.insert(name.clone());
                outcome.imported.push(name);
            }
            Err(message) => outcome.failed.push((name, message)),
        }
    }

    outcome
}
