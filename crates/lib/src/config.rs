//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.line-bridge/config.json`) and
//! environment. Environment variables always win over file values, matching
//! how the bridge is deployed under a process supervisor.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level bridge config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Gateway endpoint and auth.
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Local HTTP ingress settings.
    #[serde(default)]
    pub http: HttpSettings,

    /// Path to the persisted device key file. Overridden by DEVICE_KEY_PATH.
    #[serde(default)]
    pub device_key_path: Option<PathBuf>,

    /// Admin-UI webhook settings, consumed as-is (see [`WebhookSettings`]).
    #[serde(default)]
    pub webhook: WebhookSettings,
}

/// OpenClaw Gateway endpoint and shared token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// WebSocket URL of the gateway (default ws://127.0.0.1:18789).
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Shared secret for token-mode auth. When absent the bridge falls back
    /// to device-signature mode. Overridden by OPENCLAW_GATEWAY_TOKEN.
    pub token: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
        }
    }
}

/// HTTP ingress bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Listen port (default 5001). Overridden by BRIDGE_PORT.
    #[serde(default = "default_bridge_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"). Overridden by BRIDGE_HOST.
    #[serde(default = "default_bridge_host")]
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
            bind: default_bridge_host(),
        }
    }
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_bridge_port() -> u16 {
    5001
}

fn default_bridge_host() -> String {
    "0.0.0.0".to_string()
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the gateway URL: env OPENCLAW_GATEWAY_URL overrides config.
pub fn resolve_gateway_url(config: &BridgeConfig) -> String {
    std::env::var("OPENCLAW_GATEWAY_URL")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| config.gateway.url.clone())
}

/// Resolve the gateway token: env OPENCLAW_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &BridgeConfig) -> Option<String> {
    std::env::var("OPENCLAW_GATEWAY_TOKEN")
        .ok()
        .and_then(non_empty)
        .or_else(|| config.gateway.token.clone().and_then(non_empty))
}

/// Resolve the HTTP listen port: env BRIDGE_PORT overrides config.
pub fn resolve_bridge_port(config: &BridgeConfig) -> u16 {
    std::env::var("BRIDGE_PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(config.http.port)
}

/// Resolve the HTTP bind address: env BRIDGE_HOST overrides config.
pub fn resolve_bridge_host(config: &BridgeConfig) -> String {
    std::env::var("BRIDGE_HOST")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| config.http.bind.clone())
}

/// Resolve the device key path: env DEVICE_KEY_PATH overrides config.
pub fn resolve_device_key_path(config: &BridgeConfig) -> PathBuf {
    std::env::var("DEVICE_KEY_PATH")
        .ok()
        .and_then(non_empty)
        .map(PathBuf::from)
        .or_else(|| config.device_key_path.clone())
        .unwrap_or_else(crate::device::default_device_key_path)
}

/// Resolve config path from env or default (~/.line-bridge/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("LINE_BRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".line-bridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or LINE_BRIDGE_CONFIG_PATH). Missing
/// file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(BridgeConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        BridgeConfig::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Webhook settings owned by the external admin UI (the OpenWrt form). The
/// bridge consumes them as-is and only validates shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default = "default_webhook_bind")]
    pub bind_address: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub channel_secret: Option<String>,
    #[serde(default = "default_processor")]
    pub processor: String,
    #[serde(default)]
    pub remote_api_url: Option<String>,
    #[serde(default)]
    pub remote_api_key: Option<String>,
    #[serde(default)]
    pub remote_api_model: Option<String>,
    #[serde(default)]
    pub remote_api_timeout: Option<u64>,
    #[serde(default)]
    pub openclaw_url: Option<String>,
    #[serde(default)]
    pub openclaw_token: Option<String>,
    #[serde(default)]
    pub openclaw_timeout: Option<u64>,
    #[serde(default)]
    pub grafana_user_id: Option<String>,
    #[serde(default)]
    pub grafana_secret: Option<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_webhook_port(),
            bind_address: default_webhook_bind(),
            log_level: default_log_level(),
            use_tls: false,
            tls_cert: None,
            tls_key: None,
            access_token: None,
            channel_secret: None,
            processor: default_processor(),
            remote_api_url: None,
            remote_api_key: None,
            remote_api_model: None,
            remote_api_timeout: None,
            openclaw_url: None,
            openclaw_token: None,
            openclaw_timeout: None,
            grafana_user_id: None,
            grafana_secret: None,
        }
    }
}

fn default_webhook_port() -> u16 {
    5000
}

fn default_webhook_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_processor() -> String {
    "echo".to_string()
}

pub const LOG_LEVELS: [&str; 5] = ["critical", "error", "warning", "info", "debug"];
pub const PROCESSORS: [&str; 3] = ["echo", "remote_llm", "openclaw"];

/// LINE user ids are "U" followed by 32 lowercase hex chars. Empty/absent is
/// valid: the field is optional.
pub fn is_valid_grafana_user_id(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let Some(rest) = value.strip_prefix('U') else {
        return false;
    };
    rest.len() == 32
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Map the admin UI's log_level to a log filter. The log crate has no
/// "critical" level; it collapses onto error.
pub fn log_level_filter(level: &str) -> log::LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "critical" | "error" => log::LevelFilter::Error,
        "warning" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        _ => log::LevelFilter::Info,
    }
}

impl WebhookSettings {
    /// Shape validation for the admin-UI fields the bridge cares about.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            anyhow::bail!("invalid log_level: {}", self.log_level);
        }
        if !PROCESSORS.contains(&self.processor.as_str()) {
            anyhow::bail!("invalid processor: {}", self.processor);
        }
        if let Some(ref id) = self.grafana_user_id {
            if !is_valid_grafana_user_id(id) {
                anyhow::bail!("invalid grafana_user_id: expected U followed by 32 hex chars");
            }
        }
        if self.use_tls {
            if self.tls_cert.as_deref().map_or(true, |s| s.trim().is_empty()) {
                anyhow::bail!("use_tls requires tls_cert");
            }
            if self.tls_key.as_deref().map_or(true, |s| s.trim().is_empty()) {
                anyhow::bail!("use_tls requires tls_key");
            }
        }
        Ok(())
    }
}
