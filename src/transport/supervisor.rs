//! Connection supervisor: owns the physical connection and its lifecycle.
//!
//! State machine:
//!
//! ```text
//! Closed ──acquire──► Connecting ──ok──► Open
//!    ▲                    │               │
//!    └──timeout / error───┘◄──invalidate──┘
//! ```
//!
//! There is no draining `Closing` state: any failure drops the handle at
//! once, and the next `acquire` connects afresh. The supervisor is not
//! internally synchronized; the client keeps it behind its send mutex, which
//! makes acquisition single-flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{BoxSink, BoxSource, Connector};
use crate::error::{ClientError, Result};

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Closed,
    /// A connect attempt is in flight.
    Connecting,
    /// Usable connection.
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => f.write_str("closed"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
        }
    }
}

/// Owner of the connection handle.
pub struct ConnectionSupervisor {
    endpoint: String,
    connector: Arc<dyn Connector>,
    /// Bound for connect, reused as the write deadline.
    timeout: Duration,
    state: ConnectionState,
    sink: Option<BoxSink>,
    /// Read half, held until the listener for this connection takes it.
    source: Option<BoxSource>,
    /// Incremented on every successful connect.
    generation: u64,
}

impl ConnectionSupervisor {
    /// Create a supervisor in the `Closed` state.
    pub fn new(endpoint: impl Into<String>, connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connector,
            timeout,
            state: ConnectionState::Closed,
            sink: None,
            source: None,
            generation: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the current (or last) connection; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Endpoint this supervisor connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ensure an open connection exists, connecting if needed.
    ///
    /// On timeout fails with [`ClientError::Timeout`]; on any other failure
    /// propagates the connector's error. Either way the handle is left
    /// cleared so the next call retries.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.state == ConnectionState::Open && self.sink.is_some() {
            return Ok(());
        }

        self.invalidate();
        self.state = ConnectionState::Connecting;
        tracing::debug!(endpoint = %self.endpoint, "connecting");

        match tokio::time::timeout(self.timeout, self.connector.connect(&self.endpoint)).await {
            Err(_) => {
                self.state = ConnectionState::Closed;
                tracing::warn!(endpoint = %self.endpoint, timeout = ?self.timeout, "connect timed out");
                Err(ClientError::Timeout {
                    operation: "connect",
                    after: self.timeout,
                })
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Closed;
                tracing::warn!(endpoint = %self.endpoint, error = %e, "connect failed");
                Err(e)
            }
            Ok(Ok((sink, source))) => {
                self.sink = Some(sink);
                self.source = Some(source);
                self.state = ConnectionState::Open;
                self.generation += 1;
                tracing::info!(endpoint = %self.endpoint, generation = self.generation, "connected");
                Ok(())
            }
        }
    }

    /// Write one text frame, bounded by the connect timeout.
    ///
    /// Any failure invalidates the connection.
    pub async fn write(&mut self, text: String) -> Result<()> {
        let sink = match self.sink.as_mut() {
            Some(sink) if self.state == ConnectionState::Open => sink,
            _ => {
                return Err(ClientError::Connection(
                    "no open connection to write to".to_string(),
                ))
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, sink.send_text(text)).await {
            Err(_) => Err(ClientError::Timeout {
                operation: "write",
                after: self.timeout,
            }),
            Ok(result) => result,
        };

        if let Err(e) = &outcome {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "write failed, dropping connection");
            self.invalidate();
        }
        outcome
    }

    /// Hand out the read half of the current connection, once.
    pub fn take_source(&mut self) -> Option<BoxSource> {
        self.source.take()
    }

    /// Drop the connection handle immediately and return to `Closed`.
    pub fn invalidate(&mut self) {
        self.sink = None;
        self.source = None;
        self.state = ConnectionState::Closed;
    }

    /// Close the connection gracefully (best effort), then invalidate.
    pub async fn shutdown(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            match tokio::time::timeout(self.timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "error closing connection"),
                Err(_) => tracing::debug!("timed out closing connection"),
            }
        }
        self.invalidate();
    }
}
