//! In-process transport backed by tokio channels.
//!
//! Lets tests and demos play the server side of a connection: every
//! `connect` hands a [`MemoryPeer`] to the [`MemoryServer`], which reads the
//! client's frames and pushes arbitrary text chunks back (whole messages,
//! several at once, or fragments).
//!
//! # Example
//!
//! ```ignore
//! use rpcstream_client::transport::memory::MemoryConnector;
//!
//! let (connector, mut server) = MemoryConnector::new();
//! // hand `connector` to ClientBuilder::connector(..)
//! let mut peer = server.accept().await.unwrap();
//! let request = peer.recv().await.unwrap();
//! peer.send(r#"{"id":"1","result":"0x1"}"#);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{BoxFuture, BoxSink, BoxSource, Connector, FrameSink, FrameSource};
use crate::error::{ClientError, Result};

#[derive(Default)]
struct Behaviour {
    /// Refuse this many upcoming connects.
    refuse: AtomicUsize,
    /// Never complete connects while set.
    hang: AtomicBool,
    /// Successful connects so far.
    connections: AtomicUsize,
}

/// Client-side half of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    behaviour: Arc<Behaviour>,
}

impl MemoryConnector {
    /// Create a connector and the server that accepts its connections.
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let behaviour = Arc::new(Behaviour::default());
        (
            Self {
                peers: tx,
                behaviour: behaviour.clone(),
            },
            MemoryServer { peers: rx, behaviour },
        )
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<(BoxSink, BoxSource)>> {
        Box::pin(async move {
            if self.behaviour.hang.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }

            let refused = self
                .behaviour
                .refuse
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ClientError::Connection(format!(
                    "connection to {} refused",
                    endpoint
                )));
            }

            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            let peer = MemoryPeer {
                incoming: from_client,
                outgoing: Some(to_client),
            };
            self.peers
                .send(peer)
                .map_err(|_| ClientError::Connection("memory server dropped".to_string()))?;
            self.behaviour.connections.fetch_add(1, Ordering::AcqRel);

            let sink: BoxSink = Box::new(MemorySink {
                tx: Some(to_server),
            });
            let source: BoxSource = Box::new(MemorySource { rx: from_server });
            Ok((sink, source))
        })
    }
}

/// Server-side control of a [`MemoryConnector`].
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    behaviour: Arc<Behaviour>,
}

impl MemoryServer {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.behaviour.refuse.store(count, Ordering::Release);
    }

    /// Make connection attempts hang (e.g. unreachable endpoint).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.behaviour.hang.store(unreachable, Ordering::Release);
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.behaviour.connections.load(Ordering::Acquire)
    }
}

/// Server end of one connection.
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryPeer {
    /// Next frame written by the client. `None` once the client side closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Push a text chunk to the client. Returns false if the client is gone.
    pub fn send(&self, chunk: impl Into<String>) -> bool {
        match &self.outgoing {
            Some(tx) => tx.send(chunk.into()).is_ok(),
            None => false,
        }
    }

    /// Close the server side; the client reads end-of-stream.
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl FrameSink for MemorySink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| ClientError::Connection("sink closed".to_string()))?;
            tx.send(text)
                .map_err(|_| ClientError::Connection("peer closed".to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx = None;
            Ok(())
        })
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl FrameSource for MemorySource {
    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}
