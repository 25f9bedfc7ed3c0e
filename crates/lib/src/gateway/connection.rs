//! Gateway connection: WebSocket transport, authentication handshake, and
//! request/response correlation.
//!
//! One task owns the socket, the connection state, and the pending-request
//! map; callers submit sends over an mpsc channel and get their result on a
//! oneshot. The map is never touched from any other task.

use crate::device::DeviceIdentity;
use crate::gateway::protocol::{
    device_signature_payload, parse_frame, ChallengePayload, ConnectAuth, ConnectClient,
    ConnectDevice, ConnectParams, InboundFrame, WsEvent, WsRequest, WsResponse, MAX_PROTOCOL,
    MIN_PROTOCOL, SCOPES,
};
use crate::gateway::GatewayError;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Deadline for each in-flight request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the whole handshake (challenge + connect response).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsTransport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Authentication mode, decided once at process start and fixed thereafter.
/// Token mode when a shared secret is configured; device-signature otherwise.
#[derive(Debug, Clone)]
pub enum AuthMode {
    Token(String),
    Device(DeviceIdentity),
}

/// Connection lifecycle. Any transport error or close is terminal: the
/// connection moves to `Closed` and every outstanding request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    AwaitingChallenge,
    Authenticating,
    Connected,
    Closed,
}

/// One in-flight request. `accepted` tracks the Sent → Accepted sub-state:
/// a response with `payload.status == "accepted"` marks it but does not
/// resolve it; only a terminal response (or timeout/close) does.
struct PendingRequest {
    reply: oneshot::Sender<Result<serde_json::Value, GatewayError>>,
    deadline: Instant,
    accepted: bool,
}

struct SendCmd {
    method: String,
    params: serde_json::Value,
    reply: oneshot::Sender<Result<serde_json::Value, GatewayError>>,
}

/// Handle to a live gateway connection. Cheap to clone; dropping every handle
/// closes the socket and ends the owner task.
#[derive(Clone, Debug)]
pub struct GatewayConnection {
    cmd_tx: mpsc::Sender<SendCmd>,
    connected: Arc<AtomicBool>,
}

impl GatewayConnection {
    /// Open the socket, run the challenge/connect handshake, and return a
    /// handle once the gateway accepts. Non-challenge events received at any
    /// point are forwarded to `event_tx` when one is given.
    pub async fn connect(
        url: &str,
        auth: AuthMode,
        event_tx: Option<mpsc::Sender<WsEvent>>,
    ) -> Result<Self, GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        log::info!("gateway socket open: {}", url);

        let (cmd_tx, cmd_rx) = mpsc::channel::<SendCmd>(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(
            ws,
            auth,
            cmd_rx,
            ready_tx,
            event_tx,
            connected.clone(),
        ));

        ready_rx
            .await
            .map_err(|_| GatewayError::Connect("connection closed during handshake".to_string()))??;
        Ok(Self { cmd_tx, connected })
    }

    /// True until the transport closes or errors.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its terminal response (or timeout).
    pub async fn send(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = SendCmd {
            method: method.to_string(),
            params,
            reply: reply_tx,
        };
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| GatewayError::ConnectionLost)?;
        reply_rx.await.map_err(|_| GatewayError::ConnectionLost)?
    }
}

/// Build the connect request for the configured auth mode. In device mode the
/// canonical JSON payload binds nonce, ts, scopes, and client metadata into
/// the signature so a captured signature cannot be replayed.
fn build_connect_request(
    auth: &AuthMode,
    challenge: &ChallengePayload,
) -> Result<WsRequest, GatewayError> {
    let client = ConnectClient::this_process();
    let scopes: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
    let params = match auth {
        AuthMode::Token(token) => ConnectParams {
            min_protocol: MIN_PROTOCOL,
            max_protocol: MAX_PROTOCOL,
            scopes,
            client,
            auth: Some(ConnectAuth {
                token: token.clone(),
            }),
            device: None,
        },
        AuthMode::Device(identity) => {
            let signed_at = chrono::Utc::now().timestamp_millis() as u64;
            let public_key = identity
                .public_key_base64url()
                .map_err(|e| GatewayError::Connect(e.to_string()))?;
            let payload = device_signature_payload(
                &challenge.nonce,
                challenge.ts,
                &scopes,
                &client,
                &identity.device_id,
                &public_key,
                signed_at,
            );
            let signature = identity
                .sign(&payload)
                .map_err(|e| GatewayError::Connect(e.to_string()))?;
            ConnectParams {
                min_protocol: MIN_PROTOCOL,
                max_protocol: MAX_PROTOCOL,
                scopes,
                client,
                auth: None,
                device: Some(ConnectDevice {
                    id: identity.device_id.clone(),
                    public_key,
                    signed_at,
                    signature,
                }),
            }
        }
    };
    let params = serde_json::to_value(params)
        .map_err(|e| GatewayError::Connect(format!("serialize connect params: {}", e)))?;
    Ok(WsRequest::new(
        uuid::Uuid::new_v4().to_string(),
        "connect",
        params,
    ))
}

/// Connection owner task: handshake, then request dispatch until the socket
/// closes or every handle is dropped.
async fn run_connection(
    mut ws: WsTransport,
    auth: AuthMode,
    mut cmd_rx: mpsc::Receiver<SendCmd>,
    ready_tx: oneshot::Sender<Result<(), GatewayError>>,
    event_tx: Option<mpsc::Sender<WsEvent>>,
    connected: Arc<AtomicBool>,
) {
    let mut state = ConnectionState::AwaitingChallenge;
    let mut pending: HashMap<String, PendingRequest> = HashMap::new();
    let mut connect_id: Option<String> = None;
    let mut ready_tx = Some(ready_tx);
    let handshake_deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut sweep = tokio::time::interval(Duration::from_secs(1));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // every handle dropped; close the socket
                    let _ = ws.close(None).await;
                    break;
                };
                let id = uuid::Uuid::new_v4().to_string();
                let frame = WsRequest::new(&id, &cmd.method, cmd.params);
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        let _ = cmd.reply.send(Err(GatewayError::Protocol(format!(
                            "serialize request: {}", e
                        ))));
                        continue;
                    }
                };
                if ws.send(Message::Text(text)).await.is_err() {
                    let _ = cmd.reply.send(Err(GatewayError::ConnectionLost));
                    break;
                }
                pending.insert(id, PendingRequest {
                    reply: cmd.reply,
                    deadline: Instant::now() + REQUEST_TIMEOUT,
                    accepted: false,
                });
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let done = handle_text_frame(
                            &text,
                            &mut ws,
                            &mut state,
                            &mut pending,
                            &mut connect_id,
                            &mut ready_tx,
                            &auth,
                            &event_tx,
                            &connected,
                        )
                        .await;
                        if done {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("gateway socket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("gateway socket error: {}", e);
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                if state != ConnectionState::Connected && Instant::now() >= handshake_deadline {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(GatewayError::Connect(
                            "handshake timed out".to_string(),
                        )));
                    }
                    break;
                }
                expire_deadlines(&mut pending);
            }
        }
    }

    state = ConnectionState::Closed;
    let _ = state;
    connected.store(false, Ordering::SeqCst);
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Err(GatewayError::Connect(
            "connection closed before handshake completed".to_string(),
        )));
    }
    // reject everything still outstanding right now rather than letting the
    // 60s deadlines fire one by one
    for (_, entry) in pending.drain() {
        let _ = entry.reply.send(Err(GatewayError::ConnectionLost));
    }
}

/// Reject pending requests whose deadline has elapsed.
fn expire_deadlines(pending: &mut HashMap<String, PendingRequest>) {
    let now = Instant::now();
    let expired: Vec<String> = pending
        .iter()
        .filter(|(_, entry)| entry.deadline <= now)
        .map(|(id, _)| id.clone())
        .collect();
    for id in expired {
        if let Some(entry) = pending.remove(&id) {
            log::warn!("gateway request {} timed out", id);
            let _ = entry.reply.send(Err(GatewayError::Timeout));
        }
    }
}

/// Process one inbound text frame. Returns true when the connection must close.
#[allow(clippy::too_many_arguments)]
async fn handle_text_frame(
    text: &str,
    ws: &mut WsTransport,
    state: &mut ConnectionState,
    pending: &mut HashMap<String, PendingRequest>,
    connect_id: &mut Option<String>,
    ready_tx: &mut Option<oneshot::Sender<Result<(), GatewayError>>>,
    auth: &AuthMode,
    event_tx: &Option<mpsc::Sender<WsEvent>>,
    connected: &Arc<AtomicBool>,
) -> bool {
    let Some(frame) = parse_frame(text) else {
        log::debug!("discarding unrecognized gateway frame");
        return false;
    };
    match frame {
        InboundFrame::Event(ev) if ev.event == "connect.challenge" => {
            if *state != ConnectionState::AwaitingChallenge {
                log::debug!("ignoring repeated connect.challenge");
                return false;
            }
            let challenge: ChallengePayload = match serde_json::from_value(ev.payload) {
                Ok(c) => c,
                Err(e) => {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(GatewayError::Connect(format!(
                            "malformed challenge: {}",
                            e
                        ))));
                    }
                    return true;
                }
            };
            let req = match build_connect_request(auth, &challenge) {
                Ok(r) => r,
                Err(e) => {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(e));
                    }
                    return true;
                }
            };
            let req_text = serde_json::to_string(&req).unwrap_or_default();
            if ws.send(Message::Text(req_text)).await.is_err() {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(GatewayError::Connect(
                        "socket closed while sending connect".to_string(),
                    )));
                }
                return true;
            }
            *connect_id = Some(req.id);
            *state = ConnectionState::Authenticating;
            false
        }
        InboundFrame::Event(ev) => {
            if let Some(tx) = event_tx {
                if tx.try_send(ev).is_err() {
                    log::debug!("event subscriber full or gone; dropping event");
                }
            }
            false
        }
        InboundFrame::Response(res) => {
            if connect_id.as_deref() == Some(res.id.as_str()) {
                return handle_connect_response(res, state, connect_id, ready_tx, connected);
            }
            resolve_pending(res, pending);
            false
        }
    }
}

/// Terminal response for the connect request ends the handshake either way.
fn handle_connect_response(
    res: WsResponse,
    state: &mut ConnectionState,
    connect_id: &mut Option<String>,
    ready_tx: &mut Option<oneshot::Sender<Result<(), GatewayError>>>,
    connected: &Arc<AtomicBool>,
) -> bool {
    if res.is_accepted_ack() {
        return false;
    }
    *connect_id = None;
    if res.is_success() {
        *state = ConnectionState::Connected;
        connected.store(true, Ordering::SeqCst);
        log::info!("gateway handshake complete");
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(()));
        }
        false
    } else {
        let msg = res
            .error_message()
            .unwrap_or_else(|| "connect rejected".to_string());
        log::warn!("gateway handshake failed: {}", msg);
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(GatewayError::Connect(msg)));
        }
        true
    }
}

/// Correlate a response with its pending request. Unknown ids are stray or
/// late frames and are discarded without touching anything else.
fn resolve_pending(res: WsResponse, pending: &mut HashMap<String, PendingRequest>) {
    if res.is_accepted_ack() {
        if let Some(entry) = pending.get_mut(&res.id) {
            entry.accepted = true;
        }
        return;
    }
    let Some(entry) = pending.remove(&res.id) else {
        log::debug!("discarding response for unknown request id {}", res.id);
        return;
    };
    if res.is_success() {
        let _ = entry
            .reply
            .send(Ok(res.payload.unwrap_or(serde_json::Value::Null)));
    } else {
        let msg = res
            .error_message()
            .unwrap_or_else(|| "gateway request failed".to_string());
        let _ = entry.reply.send(Err(GatewayError::Remote(msg)));
    }
}
