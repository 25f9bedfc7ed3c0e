//! Gateway WebSocket protocol types (connect handshake, requests, responses, events).

use serde::{Deserialize, Serialize};

/// Protocol version range this client supports (inclusive).
pub const MIN_PROTOCOL: u32 = 1;
pub const MAX_PROTOCOL: u32 = 1;

/// Scopes requested on connect.
pub const SCOPES: [&str; 3] = ["agent", "operator.write", "operator.admin"];

/// Client metadata sent on connect and bound into the device signature.
pub const CLIENT_ID: &str = "openclaw-line-bridge";
pub const CLIENT_MODE: &str = "backend";

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl WsRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            typ: "req".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Wire response: `{ "type": "res", "id", "ok"?, "error"?, "payload" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl WsResponse {
    /// True when `payload.status == "accepted"`: the request stays pending and
    /// only a later terminal response resolves it.
    pub fn is_accepted_ack(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(|s| s.as_str())
            == Some("accepted")
    }

    /// Terminal success requires no error and a truthy ok indicator.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.ok.unwrap_or(false)
    }

    /// Server-provided error message for a failed response, if any.
    pub fn error_message(&self) -> Option<String> {
        let err = self.error.as_ref()?;
        if let Some(s) = err.as_str() {
            return Some(s.to_string());
        }
        err.get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
    }
}

/// Wire event: `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub typ: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Any inbound frame: response, event, or something we don't recognize.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Response(WsResponse),
    Event(WsEvent),
}

/// Parse one inbound text frame. Returns None for frames that are neither a
/// response nor an event; the caller logs and discards them.
pub fn parse_frame(text: &str) -> Option<InboundFrame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("res") => serde_json::from_value(value).ok().map(InboundFrame::Response),
        Some("event") => serde_json::from_value(value).ok().map(InboundFrame::Event),
        _ => None,
    }
}

/// `connect.challenge` payload: `{ nonce, ts }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub nonce: String,
    #[serde(default)]
    pub ts: u64,
}

/// Client connect params. Exactly one of `auth` (token mode) or `device`
/// (signature mode) carries the credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub scopes: Vec<String>,
    pub client: ConnectClient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<ConnectDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClient {
    pub id: String,
    pub mode: String,
    pub version: String,
    pub platform: String,
}

impl ConnectClient {
    pub fn this_process() -> Self {
        Self {
            id: CLIENT_ID.to_string(),
            mode: CLIENT_MODE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAuth {
    pub token: String,
}

/// Device identity block sent with connect in signature mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDevice {
    pub id: String,
    pub public_key: String, // wire: publicKey, base64url raw ed25519 key
    pub signed_at: u64,     // wire: signedAt, Unix ms
    pub signature: String,  // base64url ed25519 signature of the canonical payload
}

/// Canonical JSON the device signs: `{nonce, ts, scopes, client, device:{id, publicKey, signedAt}}`.
/// Key order is fixed (serde_json preserve_order), so both ends serialize identical bytes.
pub fn device_signature_payload(
    nonce: &str,
    ts: u64,
    scopes: &[String],
    client: &ConnectClient,
    device_id: &str,
    public_key_b64url: &str,
    signed_at: u64,
) -> String {
    serde_json::json!({
        "nonce": nonce,
        "ts": ts,
        "scopes": scopes,
        "client": {
            "id": client.id,
            "mode": client.mode,
            "version": client.version,
            "platform": client.platform,
        },
        "device": {
            "id": device_id,
            "publicKey": public_key_b64url,
            "signedAt": signed_at,
        },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_event() {
        let text = r#"{"type":"event","event":"connect.challenge","payload":{"nonce":"n1","ts":123}}"#;
        let Some(InboundFrame::Event(ev)) = parse_frame(text) else {
            panic!("expected event frame");
        };
        assert_eq!(ev.event, "connect.challenge");
        let challenge: ChallengePayload = serde_json::from_value(ev.payload).unwrap();
        assert_eq!(challenge.nonce, "n1");
        assert_eq!(challenge.ts, 123);
    }

    #[test]
    fn accepted_status_is_not_terminal() {
        let text = r#"{"type":"res","id":"a","ok":true,"payload":{"status":"accepted"}}"#;
        let Some(InboundFrame::Response(res)) = parse_frame(text) else {
            panic!("expected response frame");
        };
        assert!(res.is_accepted_ack());
    }

    #[test]
    fn success_requires_ok_and_no_error() {
        let ok = r#"{"type":"res","id":"a","ok":true,"payload":{}}"#;
        let Some(InboundFrame::Response(res)) = parse_frame(ok) else {
            panic!()
        };
        assert!(res.is_success());

        let no_ok = r#"{"type":"res","id":"a","payload":{}}"#;
        let Some(InboundFrame::Response(res)) = parse_frame(no_ok) else {
            panic!()
        };
        assert!(!res.is_success());

        let errored = r#"{"type":"res","id":"a","ok":true,"error":{"message":"boom"}}"#;
        let Some(InboundFrame::Response(res)) = parse_frame(errored) else {
            panic!()
        };
        assert!(!res.is_success());
        assert_eq!(res.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn error_message_accepts_plain_string() {
        let text = r#"{"type":"res","id":"a","ok":false,"error":"denied"}"#;
        let Some(InboundFrame::Response(res)) = parse_frame(text) else {
            panic!()
        };
        assert_eq!(res.error_message().as_deref(), Some("denied"));
    }

    #[test]
    fn unknown_frames_are_discarded() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"type":"ping"}"#).is_none());
    }

    #[test]
    fn signature_payload_key_order_is_stable() {
        let client = ConnectClient {
            id: "openclaw-line-bridge".into(),
            mode: "backend".into(),
            version: "0.1.0".into(),
            platform: "linux".into(),
        };
        let scopes: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
        let payload = device_signature_payload("n1", 7, &scopes, &client, "dev1", "pk", 9);
        assert!(payload.starts_with(r#"{"nonce":"n1","ts":7,"scopes":["#));
        assert!(payload.contains(r#""device":{"id":"dev1","publicKey":"pk","signedAt":9}"#));
    }
}
