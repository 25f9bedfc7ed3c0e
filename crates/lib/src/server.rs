//! HTTP ingress: receives already-normalized LINE messages from the webhook
//! server and answers synchronously once the command router resolves.
//!
//! Routes: POST /message (and / as alias). The response is not written until
//! the agent call resolves or definitively fails, so the caller's own timeout
//! must be looser than the gateway's 60s request deadline.

use crate::commands::{CommandRouter, InboundMessage};
use crate::config::{
    self, resolve_bridge_host, resolve_bridge_port, resolve_device_key_path, BridgeConfig,
};
use crate::device::DeviceIdentity;
use crate::gateway::{AuthMode, GatewayClient};
use crate::session::SessionKeyring;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for the ingress handlers.
#[derive(Clone)]
pub struct BridgeState {
    pub commands: CommandRouter,
}

/// Pick the auth mode once for the process lifetime: token mode when a shared
/// secret is configured, device-signature mode otherwise.
pub fn build_gateway_client(config: &BridgeConfig) -> Result<GatewayClient> {
    let url = config::resolve_gateway_url(config);
    let auth = match config::resolve_gateway_token(config) {
        Some(token) => {
            log::info!("gateway auth: token mode");
            AuthMode::Token(token)
        }
        None => {
            let path = resolve_device_key_path(config);
            let identity = DeviceIdentity::load_or_create(&path)?;
            log::info!(
                "gateway auth: device-signature mode (device {}...)",
                &identity.device_id[..16.min(identity.device_id.len())]
            );
            AuthMode::Device(identity)
        }
    };
    Ok(GatewayClient::new(url, auth))
}

/// Build the ingress router. Split out so tests can drive it directly.
pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/", any(message_entry))
        .route("/message", any(message_entry))
        .fallback(fallback)
        .with_state(state)
}

/// Run the bridge: build the gateway client, bind, and serve until shutdown.
pub async fn run_bridge(config: BridgeConfig) -> Result<()> {
    config.webhook.validate()?;
    let gateway = build_gateway_client(&config)?;

    // Pre-connect so the first message doesn't pay the handshake. A failure
    // here is only a warning; the client reconnects lazily on first request.
    match gateway.connect().await {
        Ok(_) => log::info!("gateway connection established"),
        Err(e) => log::warn!(
            "initial gateway connection failed, will retry on first request: {}",
            e
        ),
    }

    let keyring = Arc::new(SessionKeyring::new());
    let state = BridgeState {
        commands: CommandRouter::new(keyring, gateway),
    };
    let app = router(state);

    let bind_addr = format!(
        "{}:{}",
        resolve_bridge_host(&config),
        resolve_bridge_port(&config)
    );
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("bridge listening on http://{}", bind_addr);
    log::info!("POST /message to relay messages to the OpenClaw agent");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("bridge server exited")?;
    log::info!("bridge stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// JSON response with permissive CORS headers on every reply.
fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    with_cors((status, axum::Json(body)).into_response())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    json_response(status, json!({ "error": message }))
}

fn with_cors(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    res
}

/// / and /message: OPTIONS answered with 204, POST handled, anything else 405.
async fn message_entry(
    State(state): State<BridgeState>,
    method: Method,
    body: Bytes,
) -> Response {
    match method {
        Method::OPTIONS => with_cors(StatusCode::NO_CONTENT.into_response()),
        Method::POST => handle_message(state, body).await,
        _ => json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    }
}

/// Unknown paths: 404 (OPTIONS still gets its CORS preflight 204).
async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return with_cors(StatusCode::NO_CONTENT.into_response());
    }
    json_error(StatusCode::NOT_FOUND, "Not found")
}

async fn handle_message(state: BridgeState, body: Bytes) -> Response {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    let msg = InboundMessage {
        text: payload
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string(),
        user_id: payload
            .get("userId")
            .and_then(|u| u.as_str())
            .unwrap_or("unknown")
            .to_string(),
        source_type: payload
            .get("sourceType")
            .and_then(|s| s.as_str())
            .unwrap_or("user")
            .to_string(),
        group_id: payload
            .get("groupId")
            .and_then(|g| g.as_str())
            .map(|g| g.to_string()),
        attachments: payload
            .get("attachments")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default(),
    };

    log::info!(
        "message from {}: {:?}",
        msg.user_id,
        msg.text.chars().take(50).collect::<String>()
    );

    match state.commands.handle(&msg).await {
        Ok(reply) => json_response(
            StatusCode::OK,
            json!({ "text": reply.text, "channelData": reply.channel_data }),
        ),
        Err(e) => {
            log::error!("agent call failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}
