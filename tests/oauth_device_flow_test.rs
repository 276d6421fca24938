//! Integration tests for the RFC 8628 device authorization flow against a
//! mocked authorization server, covering the cached-token short-circuit, the
//! pending-then-success poll sequence, and refresh-token fallback.

use ncp::pool::oauth::resolve_access_token;
use ncp::profile::AuthConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_config(device_auth_url: String, token_url: String) -> AuthConfig {
    AuthConfig::OauthDeviceFlow {
        client_id: "client-123".to_string(),
        client_secret: None,
        device_auth_url,
        token_url,
        scopes: vec!["tools.read".to_string()],
    }
}

#[tokio::test]
async fn full_device_flow_succeeds_after_one_pending_poll() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "devcode-abc",
            "user_code": "ABCD-EFGH",
            "verification_uri": format!("{}/activate", server.uri()),
            "interval": 1,
            "expires_in": 60,
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-token-1",
            "refresh_token": "refresh-token-1",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("tokens/example.json");
    let config = auth_config(format!("{}/device/code", server.uri()), format!("{}/token", server.uri()));

    let token = resolve_access_token(&config, token_path.clone()).await.unwrap();
    assert_eq!(token, "access-token-1");
    assert!(token_path.exists());
}

#[tokio::test]
async fn cached_unexpired_token_never_hits_the_network() {
    let server = MockServer::start().await;
    // No mocks registered: any request would fail the test via a 404/connection
    // mismatch, which is exactly the point — a still-valid cached token must
    // short-circuit before any HTTP call is made.

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("tokens/example.json");
    std::fs::create_dir_all(token_path.parent().unwrap()).unwrap();
    std::fs::write(
        &token_path,
        serde_json::to_string(&json!({
            "access_token": "still-good",
            "refresh_token": null,
            "expires_at_unix_ms": now_unix_ms() + 3_600_000,
        }))
        .unwrap(),
    )
    .unwrap();

    let config = auth_config(format!("{}/device/code", server.uri()), format!("{}/token", server.uri()));
    let token = resolve_access_token(&config, token_path).await.unwrap();
    assert_eq!(token, "still-good");
}

#[tokio::test]
async fn expired_token_with_refresh_token_refreshes_instead_of_reauthorizing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "refreshed-access-token",
            "refresh_token": "refreshed-refresh-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("tokens/example.json");
    std::fs::create_dir_all(token_path.parent().unwrap()).unwrap();
    std::fs::write(
        &token_path,
        serde_json::to_string(&json!({
            "access_token": "stale-access-token",
            "refresh_token": "old-refresh-token",
            "expires_at_unix_ms": 0,
        }))
        .unwrap(),
    )
    .unwrap();

    let config = auth_config(format!("{}/device/code", server.uri()), format!("{}/token", server.uri()));
    let token = resolve_access_token(&config, token_path).await.unwrap();
    assert_eq!(token, "refreshed-access-token");
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
