//! RFC 8628 OAuth 2.0 Device Authorization Grant, for `oauth-device-flow` auth
//! on Remote servers (spec §4.6). The core performs the raw HTTP exchange and
//! polling itself; presenting `verification_uri`/`user_code` to a human is an
//! external collaborator's concern — this module only logs them.
//!
//! Grounded on the teacher's `reqwest`-based HTTP client usage (no existing
//! OAuth code in the teacher; the shape follows RFC 8628 directly, using the
//! same `reqwest`/`serde_json` stack the teacher uses for all other HTTP).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::profile::AuthConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at_unix_ms: u64,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        now_unix_ms() >= self.expires_at_unix_ms.saturating_sub(30_000)
    }
}

#[derive(Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default = "default_interval")]
    interval: u64,
    expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn load_cached(path: &Path) -> Option<CachedToken> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save_cached(path: &Path, token: &CachedToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(token)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolves a usable access token for an `oauth-device-flow` auth config,
/// using the cache at `token_path` first, refreshing if possible, and
/// falling back to a full device-authorization exchange otherwise.
pub async fn resolve_access_token(auth: &AuthConfig, token_path: PathBuf) -> Result<String> {
    let AuthConfig::OauthDeviceFlow {
        client_id,
        client_secret,
        device_auth_url,
        token_url,
        scopes,
    } = auth
    else {
        return Err(anyhow!("resolve_access_token called with non-device-flow auth"));
    };

    if let Some(cached) = load_cached(&token_path) {
        if !cached.is_expired() {
            return Ok(cached.access_token);
        }
        if let Some(refresh_token) = &cached.refresh_token {
            if let Ok(refreshed) = refresh(token_url, client_id, client_secret.as_deref(), refresh_token).await {
                save_cached(&token_path, &refreshed)?;
                return Ok(refreshed.access_token);
            }
        }
    }

    let token = device_authorize(device_auth_url, token_url, client_id, client_secret.as_deref(), scopes).await?;
    save_cached(&token_path, &token)?;
    Ok(token.access_token)
}

async fn refresh(
    token_url: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<CachedToken> {
    let client = reqwest::Client::new();
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    let response = client
        .post(token_url)
        .form(&form)
        .send()
        .await
        .context("refresh token request failed")?;
    let body: TokenResponse = response.json().await.context("parsing refresh token response")?;
    Ok(CachedToken {
        access_token: body.access_token,
        refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
        expires_at_unix_ms: now_unix_ms() + body.expires_in * 1000,
    })
}

async fn device_authorize(
    device_auth_url: &str,
    token_url: &str,
    client_id: &str,
    client_secret: Option<&str>,
    scopes: &[String],
) -> Result<CachedToken> {
    let client = reqwest::Client::new();

    let mut form = vec![("client_id", client_id.to_string())];
    if !scopes.is_empty() {
        form.push(("scope", scopes.join(" ")));
    }
    let device_response: DeviceAuthResponse = client
        .post(device_auth_url)
        .form(&form)
        .send()
        .await
        .context("device authorization request failed")?
        .json()
        .await
        .context("parsing device authorization response")?;

    tracing::info!(
        verification_uri = %device_response.verification_uri,
        user_code = %device_response.user_code,
        "device authorization pending: present this code to the user"
    );

    let deadline = SystemTime::now() + Duration::from_secs(device_response.expires_in);
    let mut interval = Duration::from_secs(device_response.interval.max(1));

    loop {
        if SystemTime::now() >= deadline {
            return Err(anyhow!("device authorization expired before approval"));
        }
        tokio::time::sleep(interval).await;

        let mut poll_form = vec![
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code".to_string()),
            ("device_code", device_response.device_code.clone()),
            ("client_id", client_id.to_string()),
        ];
        if let Some(secret) = client_secret {
            poll_form.push(("client_secret", secret.to_string()));
        }

        let response = client.post(token_url).form(&poll_form).send().await.context("polling token endpoint")?;
        let status = response.status();
        let bytes = response.bytes().await.context("reading token poll response")?;

        if status.is_success() {
            let body: TokenResponse = serde_json::from_slice(&bytes).context("parsing token poll response")?;
            return Ok(CachedToken {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                expires_at_unix_ms: now_unix_ms() + body.expires_in * 1000,
            });
        }

        match serde_json::from_slice::<TokenErrorResponse>(&bytes) {
            Ok(err) if err.error == "authorization_pending" => continue,
            Ok(err) if err.error == "slow_down" => {
                interval += Duration::from_secs(5);
                continue;
            }
            Ok(err) => return Err(anyhow!("device authorization failed: {}", err.error)),
            Err(_) => return Err(anyhow!("device authorization failed with status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_expiry_has_safety_margin() {
        let token = CachedToken {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at_unix_ms: now_unix_ms() + 10_000,
        };
        assert!(token.is_expired());
    }

    #[test]
    fn cached_token_not_expired_well_before_deadline() {
        let token = CachedToken {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at_unix_ms: now_unix_ms() + 3_600_000,
        };
        assert!(!token.is_expired());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens/server1.json");
        let token = CachedToken {
            access_token: "abc".into(),
            refresh_token: Some("r1".into()),
            expires_at_unix_ms: now_unix_ms() + 60_000,
        };
        save_cached(&path, &token).unwrap();
        let loaded = load_cached(&path).unwrap();
        assert_eq!(loaded.access_token, "abc");
    }
}
