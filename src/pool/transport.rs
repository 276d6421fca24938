//! Downstream transport construction (spec §4.6): subprocess stdio for
//! `Subprocess` servers, HTTP/SSE for `Remote` servers, with auth applied to
//! every request.
//!
//! Grounded on the teacher's `mcp_routing::pool::spawn_client` for the
//! subprocess path (`TokioChildProcess` + `ConfigureCommandExt`), and on
//! `other_examples/bf64fabf_lightseekorg-smg__mcp-src-core-manager.rs.rs`'s
//! `connect_server_impl` for the Remote SSE/Streamable-HTTP paths, which the
//! teacher never implemented (its pool is subprocess-only).

use crate::env::expand_env_var;
use crate::error::GatewayError;
use crate::profile::{AuthConfig, RemoteTransport, ServerConfig};
use rmcp::model::ClientInfo;
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::{
    streamable_http_client::StreamableHttpClientTransportConfig, ConfigureCommandExt,
    SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
};
use std::time::Duration;
use tokio::process::Command;

fn client_info() -> ClientInfo {
    let mut info = ClientInfo::default();
    info.client_info.name = "ncp".into();
    info
}

async fn connect_subprocess(
    server_name: &str,
    command: &str,
    args: &[String],
    env: &std::collections::HashMap<String, String>,
) -> Result<RunningService<RoleClient, ClientInfo>, GatewayError> {
    let working_dir = crate::paths::subprocess_working_dir();
    let transport = TokioChildProcess::new(Command::new(command).configure(|cmd| {
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, expand_env_var(value));
        }
        if let Some(dir) = &working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
    }))
    .map_err(|e| GatewayError::Connect {
        server: server_name.to_string(),
        message: format!("spawning subprocess transport: {e}"),
    })?;

    client_info().serve(transport).await.map_err(|e| GatewayError::Connect {
        server: server_name.to_string(),
        message: format!("initializing subprocess client: {e}"),
    })
}

async fn resolve_auth_token(
    server_name: &str,
    auth: &AuthConfig,
) -> Result<Option<String>, GatewayError> {
    match auth {
        AuthConfig::None => Ok(None),
        AuthConfig::Bearer { token } => Ok(Some(token.clone())),
        AuthConfig::ApiKey { value, .. } => Ok(Some(value.clone())),
        AuthConfig::Basic { username, password } => {
            use base64::Engine;
            let raw = format!("{username}:{password}");
            Ok(Some(base64::engine::general_purpose::STANDARD.encode(raw)))
        }
        AuthConfig::OauthDeviceFlow { .. } => {
            let path = crate::paths::token_path(server_name);
            crate::pool::oauth::resolve_access_token(auth, path)
                .await
                .map(Some)
                .map_err(|e| GatewayError::Connect {
                    server: server_name.to_string(),
                    message: format!("oauth token resolution failed: {e}"),
                })
        }
    }
}

fn auth_header_value(auth: &AuthConfig, resolved: &str) -> (reqwest::header::HeaderName, String) {
    match auth {
        AuthConfig::ApiKey { header, .. } => (
            reqwest::header::HeaderName::from_bytes(header.as_bytes())
                .unwrap_or(reqwest::header::AUTHORIZATION),
            resolved.to_string(),
        ),
        AuthConfig::Basic { .. } => (reqwest::header::AUTHORIZATION, format!("Basic {resolved}")),
        _ => (reqwest::header::AUTHORIZATION, format!("Bearer {resolved}")),
    }
}

async fn connect_remote(
    server_name: &str,
    url: &str,
    transport_kind: RemoteTransport,
    auth: &AuthConfig,
    connect_timeout: Duration,
) -> Result<RunningService<RoleClient, ClientInfo>, GatewayError> {
    let resolved_token = resolve_auth_token(server_name, auth).await?;

    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
    if let Some(token) = &resolved_token {
        let (header_name, header_value) = auth_header_value(auth, token);
        let mut headers = reqwest::header::HeaderMap::new();
        let value = header_value.parse().map_err(|e| GatewayError::Connect {
            server: server_name.to_string(),
            message: format!("invalid auth header value: {e}"),
        })?;
        headers.insert(header_name, value);
        builder = builder.default_headers(headers);
    }
    let http_client = builder.build().map_err(|e| GatewayError::Connect {
        server: server_name.to_string(),
        message: format!("building HTTP client: {e}"),
    })?;

    match transport_kind {
        RemoteTransport::Sse => {
            let cfg = rmcp::transport::sse_client::SseClientConfig {
                sse_endpoint: url.to_string().into(),
                ..Default::default()
            };
            let transport = SseClientTransport::start_with_client(http_client, cfg)
                .await
                .map_err(|e| GatewayError::Connect {
                    server: server_name.to_string(),
                    message: format!("creating SSE transport: {e}"),
                })?;
            client_info().serve(transport).await.map_err(|e| GatewayError::Connect {
                server: server_name.to_string(),
                message: format!("initializing SSE client: {e}"),
            })
        }
        RemoteTransport::Http => {
            let mut cfg = StreamableHttpClientTransportConfig::with_uri(url);
            if let Some(token) = &resolved_token {
                cfg.auth_header = Some(token.clone());
            }
            let transport = StreamableHttpClientTransport::from_config(cfg);
            client_info().serve(transport).await.map_err(|e| GatewayError::Connect {
                server: server_name.to_string(),
                message: format!("initializing streamable HTTP client: {e}"),
            })
        }
    }
}

/// Establishes a downstream connection per the server's configuration,
/// racing the attempt against `timeout`.
pub async fn connect(
    server_name: &str,
    config: &ServerConfig,
    timeout: Duration,
) -> Result<RunningService<RoleClient, ClientInfo>, GatewayError> {
    let attempt = async {
        match config {
            ServerConfig::Subprocess { command, args, env, .. } => {
                connect_subprocess(server_name, command, args, env).await
            }
            ServerConfig::Remote { url, transport, auth, .. } => {
                connect_remote(server_name, url, *transport, auth, timeout).await
            }
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Connect {
            server: server_name.to_string(),
            message: format!("connect timed out after {timeout:?}"),
        }),
    }
}
