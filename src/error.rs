//! Error types for rpcstream-client.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::RpcError;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect, write, or background read exceeded its deadline.
    #[error("rpc timeout: {operation} did not complete within {after:?}")]
    Timeout {
        /// Which operation timed out (`"connect"`, `"write"`, `"read"`).
        operation: &'static str,
        /// The configured bound that was exceeded.
        after: Duration,
    },

    /// Missing or duplicate correlation id, or an otherwise unsendable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport-level failure reported by the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// Transport-level failure not originating from the WebSocket layer.
    #[error("connection error: {0}")]
    Connection(String),

    /// The background listener stopped while this call was pending.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the listener stopped.
        reason: String,
    },

    /// The client was closed.
    #[error("client closed")]
    ClientClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer answered with a JSON-RPC error object.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

impl ClientError {
    /// Returns true for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// Returns true when a fresh `send` may succeed without caller changes.
    ///
    /// Connection-level failures invalidate the shared connection, so the
    /// next call reconnects.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::WebSocket(_)
                | ClientError::Connection(_)
                | ClientError::ConnectionLost { .. }
        )
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(err))
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
