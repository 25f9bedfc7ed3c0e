//! Command router: intercepts built-in slash-commands and forwards everything
//! else to the gateway as an agent turn.
//!
//! Matching is exact equality after trim + lowercase. There is no prefix
//! tolerance: "/new foo" is a regular message, not a /new.

use crate::gateway::{AgentReply, GatewayClient, GatewayError};
use crate::session::SessionKeyring;
use std::sync::Arc;

/// Normalized inbound message, as delivered by the LINE webhook server.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub text: String,
    pub user_id: String,
    pub source_type: String,
    pub group_id: Option<String>,
    pub attachments: Vec<serde_json::Value>,
}

/// How one message is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Static help listing; never reaches the gateway.
    Help,
    /// Bump the chat's epoch so the next message starts a fresh session
    /// (/new and /clear are aliases); never reaches the gateway.
    NewSession,
    /// Everything else, including /status, /model, and /models: the remote
    /// agent owns that information, so the message goes through.
    Forward,
}

/// Classify a message. Input is trimmed and lowercased before the exact match.
pub fn classify(text: &str) -> Command {
    match text.trim().to_lowercase().as_str() {
        "/help" => Command::Help,
        "/new" | "/clear" => Command::NewSession,
        _ => Command::Forward,
    }
}

/// Help listing for the six documented commands.
pub fn help_text() -> &'static str {
    "Available commands:\n\
     /help - show this help\n\
     /new - start a new conversation\n\
     /clear - same as /new\n\
     /status - agent status (answered by the agent)\n\
     /model - show the current model (answered by the agent)\n\
     /models - list available models (answered by the agent)"
}

/// The gateway requires a non-empty message body, so an attachment-only
/// message is replaced by a placeholder naming the attachment types.
pub fn attachment_placeholder(attachments: &[serde_json::Value]) -> String {
    let types: Vec<&str> = attachments
        .iter()
        .map(|a| a.get("type").and_then(|t| t.as_str()).unwrap_or("file"))
        .collect();
    format!("[attachments: {}]", types.join(", "))
}

/// Reply produced for the HTTP caller.
#[derive(Debug, Clone)]
pub struct RouterReply {
    pub text: String,
    pub channel_data: serde_json::Value,
}

impl RouterReply {
    fn local(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel_data: serde_json::json!({}),
        }
    }
}

impl From<AgentReply> for RouterReply {
    fn from(reply: AgentReply) -> Self {
        Self {
            text: reply.text,
            channel_data: reply.channel_data,
        }
    }
}

/// Routes inbound messages: local commands are answered here, the rest are
/// forwarded to the gateway under the chat's current session key.
#[derive(Clone)]
pub struct CommandRouter {
    keyring: Arc<SessionKeyring>,
    gateway: GatewayClient,
}

impl CommandRouter {
    pub fn new(keyring: Arc<SessionKeyring>, gateway: GatewayClient) -> Self {
        Self { keyring, gateway }
    }

    /// Handle one message end to end. Local commands never touch the gateway;
    /// forwarded messages block until the agent call resolves or fails.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<RouterReply, GatewayError> {
        let group_id = msg.group_id.as_deref();
        match classify(&msg.text) {
            Command::Help => Ok(RouterReply::local(help_text())),
            Command::NewSession => {
                let epoch = self.keyring.bump(&msg.user_id, group_id).await;
                Ok(RouterReply::local(format!(
                    "Started a new conversation (epoch {}).",
                    epoch
                )))
            }
            Command::Forward => {
                let session_key = self.keyring.resolve(&msg.user_id, group_id).await;
                let text = if msg.text.trim().is_empty() && !msg.attachments.is_empty() {
                    attachment_placeholder(&msg.attachments)
                } else {
                    msg.text.clone()
                };
                let attachments = if msg.attachments.is_empty() {
                    None
                } else {
                    Some(&msg.attachments)
                };
                let reply = self
                    .gateway
                    .call_agent(&text, &session_key, attachments)
                    .await?;
                Ok(reply.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::AuthMode;
    use crate::device::DeviceIdentity;

    fn router() -> CommandRouter {
        // gateway is never reached by local commands
        let identity = DeviceIdentity::generate().unwrap();
        let gateway = GatewayClient::new("ws://127.0.0.1:1", AuthMode::Device(identity));
        CommandRouter::new(Arc::new(SessionKeyring::new()), gateway)
    }

    fn msg(text: &str, user_id: &str) -> InboundMessage {
        InboundMessage {
            text: text.to_string(),
            user_id: user_id.to_string(),
            source_type: "user".to_string(),
            group_id: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn classification_is_exact_after_trim_and_lowercase() {
        assert_eq!(classify("/help"), Command::Help);
        assert_eq!(classify("  /HELP  "), Command::Help);
        assert_eq!(classify("/New"), Command::NewSession);
        assert_eq!(classify("/clear"), Command::NewSession);
        // no prefix matching
        assert_eq!(classify("/new foo"), Command::Forward);
        assert_eq!(classify("/helpme"), Command::Forward);
        // the agent owns these
        assert_eq!(classify("/status"), Command::Forward);
        assert_eq!(classify("/model"), Command::Forward);
        assert_eq!(classify("/models"), Command::Forward);
        assert_eq!(classify(""), Command::Forward);
    }

    #[test]
    fn help_lists_the_six_commands() {
        let text = help_text();
        for cmd in ["/help", "/new", "/clear", "/status", "/model", "/models"] {
            assert!(text.contains(cmd), "missing {} in help", cmd);
        }
        assert_eq!(text.matches("\n/").count() + 1, 6);
    }

    #[test]
    fn attachment_placeholder_names_types() {
        let atts = vec![
            serde_json::json!({"type": "image", "url": "https://x/a.png"}),
            serde_json::json!({"type": "video"}),
            serde_json::json!({"url": "https://x/b"}),
        ];
        assert_eq!(attachment_placeholder(&atts), "[attachments: image, video, file]");
    }

    #[tokio::test]
    async fn new_bumps_only_the_callers_epoch() {
        let router = router();
        let reply = router.handle(&msg("/new", "U1")).await.unwrap();
        assert!(reply.text.contains("epoch 1"));
        let reply = router.handle(&msg(" /CLEAR ", "U1")).await.unwrap();
        assert!(reply.text.contains("epoch 2"));

        assert_eq!(
            router.keyring.resolve("U1", None).await,
            "agent:main:line-bridge:dm:U1:v2"
        );
        // other users untouched
        assert_eq!(
            router.keyring.resolve("U2", None).await,
            "agent:main:line-bridge:dm:U2"
        );
    }

    #[tokio::test]
    async fn help_never_touches_the_gateway() {
        // gateway url is unroutable; if /help tried to connect this would error
        let router = router();
        let reply = router.handle(&msg("/help", "U1")).await.unwrap();
        assert_eq!(reply.text, help_text());
        assert_eq!(reply.channel_data, serde_json::json!({}));
    }
}
