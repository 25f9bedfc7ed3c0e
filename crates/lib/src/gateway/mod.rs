//! Gateway client: WebSocket protocol, connection/auth state machine, and the
//! public call surface used by the HTTP ingress.

mod client;
mod connection;
pub mod protocol;

pub use client::{AgentReply, Attachments, GatewayClient};
pub use connection::{AuthMode, GatewayConnection, REQUEST_TIMEOUT};

/// Gateway-side failure taxonomy. Everything surfaces to the HTTP caller;
/// nothing here triggers a retry.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport open or handshake failure.
    #[error("gateway connect failed: {0}")]
    Connect(String),

    /// No terminal response within the per-request deadline.
    #[error("gateway request timed out")]
    Timeout,

    /// Transport closed or errored while the request was outstanding.
    #[error("gateway connection lost")]
    ConnectionLost,

    /// Terminal response carried an error or a falsy ok.
    #[error("{0}")]
    Remote(String),

    /// Local framing problem (e.g. unserializable params).
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}
