//! Client builder and the send gate.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring timeouts,
//! codec, transport and event callbacks. The [`StreamingClient`] owns one
//! lazily opened connection and multiplexes every call over it:
//! 1. Register the call's id in the correlation table
//! 2. Acquire (or open) the connection
//! 3. Write the request frame
//! 4. Start the background listener for this connection, once
//! 5. Release the gate and wait for the matching reply
//!
//! Steps 1-4 run under one async mutex, so writes never interleave and a
//! single connect is in flight at a time.
//!
//! # Example
//!
//! ```ignore
//! use rpcstream_client::{RpcRequest, StreamingClient};
//!
//! #[tokio::main]
//! async fn main() -> rpcstream_client::Result<()> {
//!     let client = StreamingClient::builder("ws://127.0.0.1:8546")
//!         .on_event(|event| println!("push: {:?}", event.params))
//!         .build()?;
//!
//!     let reply = client
//!         .send(RpcRequest::without_params(1i64, "eth_blockNumber"))
//!         .await?;
//!     println!("block: {:?}", reply.result);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::codec::{Codec, JsonCodec};
use crate::config::ClientConfig;
use crate::correlator::{PendingCall, RequestCorrelator};
use crate::dispatch::DispatchRouter;
use crate::error::{ClientError, Result};
use crate::events::{Diagnostic, DiagnosticCallback, EventCallback, EventHub, EventSubscription};
use crate::listener::{Listener, StopReason};
use crate::protocol::{FrameAssembler, RequestId, RpcRequest, RpcResponse, StreamingMessage};
use crate::transport::{ConnectionState, ConnectionSupervisor, Connector, WsConnector};

/// Builder for configuring and creating a [`StreamingClient`].
///
/// Building does not connect; the first `send` does.
pub struct ClientBuilder {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    connector: Option<Arc<dyn Connector>>,
    callbacks: Vec<EventCallback>,
    diagnostics: Vec<DiagnosticCallback>,
}

impl ClientBuilder {
    /// Create a builder for `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(endpoint))
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            codec: Arc::new(JsonCodec::default()),
            connector: None,
            callbacks: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Set the connect timeout, also used as the write deadline.
    ///
    /// Default: 20 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the background read timeout.
    ///
    /// When no data arrives within this bound the listener stops and every
    /// pending call fails with [`ClientError::ConnectionLost`].
    /// Default: 10 seconds
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the push-event channel capacity.
    ///
    /// Default: 1024
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Set the largest incomplete message kept between reads, in bytes.
    ///
    /// Default: 16 MiB
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.config.max_fragment_len = len;
        self
    }

    /// Use a custom codec for requests and incoming text.
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Use a custom transport instead of WebSocket.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Register a callback invoked for every push event.
    ///
    /// Callbacks run on the listener task and must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StreamingMessage) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Register an observer for transport diagnostics.
    pub fn on_diagnostic<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.diagnostics.push(Arc::new(observer));
        self
    }

    /// Validate the configuration and create the client.
    pub fn build(self) -> Result<StreamingClient> {
        self.config.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()));
        let supervisor = ConnectionSupervisor::new(
            self.config.endpoint.clone(),
            connector,
            self.config.connect_timeout,
        );
        let events = Arc::new(EventHub::with_callbacks(
            self.config.event_channel_capacity,
            self.callbacks,
            self.diagnostics,
        ));

        let shared = Shared {
            gate: Mutex::new(Gate {
                supervisor,
                listener: None,
                closed: false,
            }),
            correlator: Arc::new(RequestCorrelator::new()),
            events,
            codec: self.codec,
            config: self.config,
        };

        Ok(StreamingClient {
            shared: Arc::new(shared),
        })
    }
}

/// Handle of the listener task bound to one connection generation.
struct ListenerHandle {
    generation: u64,
    task: JoinHandle<()>,
    /// Set by the task as soon as its read loop ends, before it takes the gate.
    stopped: Arc<OnceLock<StopReason>>,
}

/// State guarded by the send mutex.
struct Gate {
    supervisor: ConnectionSupervisor,
    listener: Option<ListenerHandle>,
    closed: bool,
}

struct Shared {
    gate: Mutex<Gate>,
    correlator: Arc<RequestCorrelator>,
    events: Arc<EventHub>,
    codec: Arc<dyn Codec>,
    config: ClientConfig,
}

impl Shared {
    /// Register `keys`, make sure a connection is open, and write `frame`.
    ///
    /// Returns one pending call per key, in order. Any failure drops the
    /// registrations made so far.
    async fn submit(self: &Arc<Self>, keys: &[String], frame: String) -> Result<Vec<PendingCall>> {
        let mut gate = self.gate.lock().await;
        if gate.closed {
            return Err(ClientError::ClientClosed);
        }
        self.reap_stopped_listener(&mut gate);

        let calls = keys
            .iter()
            .map(|key| self.correlator.register(key))
            .collect::<Result<Vec<_>>>()?;

        gate.supervisor.acquire().await?;

        if let Err(e) = gate.supervisor.write(frame).await {
            drop(calls);
            self.connection_lost(&mut gate, &e.to_string());
            return Err(e);
        }

        self.ensure_listener(&mut gate);
        Ok(calls)
    }

    /// Spawn the listener for the current connection unless one runs already.
    fn ensure_listener(self: &Arc<Self>, gate: &mut Gate) {
        let generation = gate.supervisor.generation();
        match &gate.listener {
            Some(handle) if handle.generation == generation => return,
            Some(stale) => stale.task.abort(),
            None => {}
        }

        let source = match gate.supervisor.take_source() {
            Some(source) => source,
            None => {
                tracing::warn!(generation, "connection has no read half, listener not started");
                return;
            }
        };

        let assembler = FrameAssembler::with_codec(self.codec.clone())
            .with_max_fragment_len(self.config.max_fragment_len);
        let router = DispatchRouter::new(self.correlator.clone(), self.events.clone());
        let listener = Listener::new(
            source,
            assembler,
            router,
            self.config.read_timeout,
            generation,
        );

        self.events.diagnose(Diagnostic::Connected { generation });
        let stopped = Arc::new(OnceLock::new());
        let task = tokio::spawn(run_listener(
            listener,
            stopped.clone(),
            Arc::downgrade(self),
        ));
        gate.listener = Some(ListenerHandle {
            generation,
            task,
            stopped,
        });
    }

    /// Retire a listener whose read loop already ended but which has not
    /// torn its connection down yet, so the caller reconnects instead of
    /// writing to a dead connection.
    fn reap_stopped_listener(&self, gate: &mut Gate) {
        let (generation, reason) = match &gate.listener {
            Some(handle) => match handle.stopped.get() {
                Some(reason) => (handle.generation, reason.clone()),
                None if handle.task.is_finished() => (
                    handle.generation,
                    StopReason::Transport("listener task ended".to_string()),
                ),
                None => return,
            },
            None => return,
        };

        if let Some(failed) = self.retire_listener(gate, generation, &reason) {
            self.report_stopped(generation, &reason, failed);
        }
    }

    /// Drop the connection of the listener for `generation` and fail every
    /// pending call. Returns `None` if that listener is no longer current.
    fn retire_listener(&self, gate: &mut Gate, generation: u64, reason: &StopReason) -> Option<usize> {
        let current = matches!(&gate.listener, Some(handle) if handle.generation == generation);
        if !current {
            return None;
        }

        gate.listener = None;
        gate.supervisor.invalidate();
        Some(self.correlator.fail_all(|| ClientError::ConnectionLost {
            reason: reason.to_string(),
        }))
    }

    fn report_stopped(&self, generation: u64, reason: &StopReason, failed: usize) {
        if failed > 0 {
            tracing::warn!(generation, %reason, failed, "listener stopped, pending requests failed");
        } else {
            tracing::info!(generation, %reason, "listener stopped");
        }
        self.events.diagnose(Diagnostic::ListenerStopped {
            reason: reason.to_string(),
            failed_requests: failed,
        });
    }

    /// Tear down the connection after a write failure.
    fn connection_lost(&self, gate: &mut Gate, reason: &str) {
        if let Some(handle) = gate.listener.take() {
            handle.task.abort();
        }
        gate.supervisor.invalidate();
        let failed = self.correlator.fail_all(|| ClientError::ConnectionLost {
            reason: reason.to_string(),
        });
        if failed > 0 {
            tracing::warn!(failed, %reason, "failed pending requests after write error");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let gate = self.gate.get_mut();
        if let Some(handle) = gate.listener.take() {
            handle.task.abort();
        }
        gate.supervisor.invalidate();
        self.correlator.fail_all(|| ClientError::ClientClosed);
    }
}

/// Body of the listener task.
///
/// When the read loop ends, normally or by a panic in a user callback, the
/// connection is dropped and every pending call fails, unless the client
/// already moved on to a newer connection.
async fn run_listener(listener: Listener, stopped: Arc<OnceLock<StopReason>>, shared: Weak<Shared>) {
    let generation = listener.generation();
    let reason = match AssertUnwindSafe(listener.run()).catch_unwind().await {
        Ok(reason) => reason,
        Err(payload) => {
            let reason = StopReason::from_panic(payload.as_ref());
            tracing::error!(generation, %reason, "listener task panicked");
            reason
        }
    };
    let _ = stopped.set(reason.clone());

    let shared = match shared.upgrade() {
        Some(shared) => shared,
        None => return,
    };

    let failed = {
        let mut gate = shared.gate.lock().await;
        match shared.retire_listener(&mut gate, generation, &reason) {
            Some(failed) => failed,
            None => {
                tracing::debug!(generation, %reason, "stale listener stopped");
                return;
            }
        }
    };

    shared.report_stopped(generation, &reason, failed);
}

/// JSON-RPC client over one persistent WebSocket.
///
/// Cheap to clone; clones share the connection, the correlation table and
/// the event channel. The connection is torn down when the last clone is
/// dropped or on [`close`](Self::close).
#[derive(Clone)]
pub struct StreamingClient {
    shared: Arc<Shared>,
}

impl StreamingClient {
    /// Create a client builder for `endpoint`.
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    /// Create a client for `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        ClientBuilder::new(endpoint).build()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Send one request and wait for its reply.
    ///
    /// The id must be non-empty and not belong to another outstanding call,
    /// otherwise this fails with [`ClientError::InvalidRequest`] before any
    /// I/O. A reply carrying an error object is returned as-is; use
    /// [`RpcResponse::into_result`] to turn it into an error.
    ///
    /// There is no per-call timeout beyond the read timeout of the
    /// background listener.
    pub async fn send(&self, request: RpcRequest) -> Result<RpcResponse> {
        let key = request.id.correlation_key();
        let frame = self.shared.codec.encode_request(&request)?;
        tracing::debug!(id = %key, method = %request.method, "sending request");
        tracing::trace!(id = %key, body = %frame, "request body");

        let mut calls = self
            .shared
            .submit(std::slice::from_ref(&key), frame)
            .await
            .inspect_err(|e| tracing::warn!(id = %key, error = %e, "request not sent"))?;
        let call = calls.pop().ok_or_else(|| {
            ClientError::InvalidRequest(format!("request id {} was not registered", key))
        })?;

        let reply = call.wait().await;
        match &reply {
            Ok(response) if response.is_error() => {
                tracing::debug!(id = %key, error = ?response.error, "error reply");
            }
            Ok(_) => tracing::debug!(id = %key, "reply received"),
            Err(e) => tracing::warn!(id = %key, error = %e, "request failed"),
        }
        reply
    }

    /// Send a request with typed parameters and decode the typed result.
    ///
    /// Unit or `null` params are omitted from the envelope. An error reply
    /// becomes [`ClientError::Rpc`].
    pub async fn request<P, R>(
        &self,
        id: impl Into<RequestId>,
        method: &str,
        params: P,
    ) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = match serde_json::to_value(params)? {
            Value::Null => RpcRequest::without_params(id, method),
            params => RpcRequest::new(id, method, params),
        };
        let result = self.send(request).await?.into_result()?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send several requests as one JSON-RPC batch frame.
    ///
    /// Replies come back in request order, whatever order the peer answers
    /// in. The first failed call fails the whole batch.
    pub async fn send_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>> {
        if requests.is_empty() {
            return Err(ClientError::InvalidRequest("empty batch".to_string()));
        }

        let keys: Vec<String> = requests.iter().map(|r| r.id.correlation_key()).collect();
        let frame = self.shared.codec.encode_batch(&requests)?;
        tracing::debug!(size = keys.len(), "sending batch");
        tracing::trace!(body = %frame, "batch body");

        let calls = self
            .shared
            .submit(&keys, frame)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "batch not sent"))?;

        futures::future::try_join_all(calls.into_iter().map(PendingCall::wait)).await
    }

    /// Subscribe to push events. Drop the subscription to unsubscribe.
    pub fn subscribe(&self) -> EventSubscription {
        self.shared.events.subscribe()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.gate.lock().await.supervisor.state()
    }

    /// Stop the listener, close the connection and fail every pending call
    /// with [`ClientError::ClientClosed`].
    ///
    /// Later sends fail with `ClientClosed` without touching the network.
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        let mut gate = self.shared.gate.lock().await;
        if gate.closed {
            return;
        }
        gate.closed = true;

        if let Some(handle) = gate.listener.take() {
            handle.task.abort();
        }
        gate.supervisor.shutdown().await;

        let failed = self.shared.correlator.fail_all(|| ClientError::ClientClosed);
        tracing::info!(endpoint = %self.shared.config.endpoint, failed, "client closed");
    }
}
