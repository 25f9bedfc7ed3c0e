//! Gateway client: the public call surface over one shared connection.
//!
//! The connection is created lazily on first use and replaced wholesale when
//! it dies; there is no partial reuse and no automatic retry, so every failure
//! surfaces to the caller.

use crate::gateway::connection::{AuthMode, GatewayConnection};
use crate::gateway::protocol::WsEvent;
use crate::gateway::GatewayError;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Placeholder returned when a terminal agent response has no usable payload.
const NO_RESPONSE_TEXT: &str = "(no response)";

/// One agent reply, extracted from `result.payloads[0]` of the terminal response.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    pub media_url: Option<String>,
    pub channel_data: serde_json::Value,
    pub meta: serde_json::Value,
}

/// Attachment descriptor forwarded verbatim from the ingress payload.
pub type Attachments = Vec<serde_json::Value>;

/// Shared gateway client handle. Clone freely; all clones use the same
/// underlying connection slot.
#[derive(Clone)]
pub struct GatewayClient {
    url: String,
    auth: AuthMode,
    connection: Arc<Mutex<Option<GatewayConnection>>>,
    event_tx: Option<mpsc::Sender<WsEvent>>,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            url: url.into(),
            auth,
            connection: Arc::new(Mutex::new(None)),
            event_tx: None,
        }
    }

    /// Forward non-challenge gateway events to this channel.
    pub fn with_event_subscriber(mut self, tx: mpsc::Sender<WsEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Get the live connection, building one if the slot is empty or the
    /// previous connection died. The slot lock also serializes concurrent
    /// first-callers so only one handshake runs.
    pub async fn connect(&self) -> Result<GatewayConnection, GatewayError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_connected() {
                return Ok(conn.clone());
            }
            log::info!("gateway connection lost; reconnecting");
        }
        let conn =
            GatewayConnection::connect(&self.url, self.auth.clone(), self.event_tx.clone()).await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one agent turn. A fresh idempotency key is generated per call so
    /// the gateway could deduplicate if a caller ever retried; this client
    /// itself never retries.
    pub async fn call_agent(
        &self,
        message: &str,
        session_key: &str,
        attachments: Option<&Attachments>,
    ) -> Result<AgentReply, GatewayError> {
        let conn = self.connect().await?;
        let mut params = json!({
            "message": message,
            "sessionKey": session_key,
            "deliver": false,
            "idempotencyKey": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(atts) = attachments {
            if !atts.is_empty() {
                params["attachments"] = serde_json::Value::Array(atts.clone());
            }
        }
        log::debug!("agent call for session {}", session_key);
        let payload = conn.send("agent", params).await?;
        Ok(extract_agent_reply(&payload))
    }

    /// Query the gateway for the state of one session key.
    pub async fn call_session_status(
        &self,
        session_key: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let conn = self.connect().await?;
        conn.send("session_status", json!({ "sessionKey": session_key }))
            .await
    }
}

/// Pull `{text, mediaUrl, channelData, meta}` out of the first entry of
/// `result.payloads` (falling back to a top-level `payloads`). A missing or
/// empty payload list yields the fixed no-response placeholder instead of an
/// error, so the HTTP caller still gets a 200.
fn extract_agent_reply(payload: &serde_json::Value) -> AgentReply {
    let payloads = payload
        .get("result")
        .and_then(|r| r.get("payloads"))
        .or_else(|| payload.get("payloads"))
        .and_then(|p| p.as_array());
    let Some(first) = payloads.and_then(|p| p.first()) else {
        return AgentReply {
            text: NO_RESPONSE_TEXT.to_string(),
            ..Default::default()
        };
    };
    AgentReply {
        text: first
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or(NO_RESPONSE_TEXT)
            .to_string(),
        media_url: first
            .get("mediaUrl")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string()),
        channel_data: first
            .get("channelData")
            .cloned()
            .unwrap_or_else(|| json!({})),
        meta: first.get("meta").cloned().unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_payload() {
        let payload = json!({
            "result": {
                "payloads": [
                    { "text": "hi", "mediaUrl": "https://x/img.png", "channelData": {"line": 1} },
                    { "text": "ignored" }
                ]
            }
        });
        let reply = extract_agent_reply(&payload);
        assert_eq!(reply.text, "hi");
        assert_eq!(reply.media_url.as_deref(), Some("https://x/img.png"));
        assert_eq!(reply.channel_data["line"], 1);
    }

    #[test]
    fn top_level_payloads_also_accepted() {
        let payload = json!({ "payloads": [ { "text": "plain" } ] });
        assert_eq!(extract_agent_reply(&payload).text, "plain");
    }

    #[test]
    fn missing_shape_yields_placeholder_not_error() {
        for payload in [json!({}), json!({"result": {}}), json!({"result": {"payloads": []}})] {
            let reply = extract_agent_reply(&payload);
            assert_eq!(reply.text, NO_RESPONSE_TEXT);
            assert!(reply.media_url.is_none());
        }
    }
}
