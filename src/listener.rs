//! Background listener: the single reader of a connection.
//!
//! Reads text chunks under the force-complete deadline, feeds them through
//! the [`FrameAssembler`] and routes every assembled message. Decode
//! failures never stop it; a read timeout, end of stream or transport error
//! does.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::dispatch::DispatchRouter;
use crate::protocol::FrameAssembler;
use crate::transport::BoxSource;

/// Why a listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// End of stream or close frame.
    PeerClosed,
    /// No chunk arrived within the read deadline.
    ReadTimeout(Duration),
    /// The transport reported an error.
    Transport(String),
    /// The listener task panicked, e.g. inside an event callback.
    Panicked(String),
}

impl StopReason {
    /// Build a reason from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        StopReason::Panicked(message)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::PeerClosed => f.write_str("connection closed by peer"),
            StopReason::ReadTimeout(after) => write!(f, "rpc timeout: no data within {:?}", after),
            StopReason::Transport(e) => write!(f, "transport error: {}", e),
            StopReason::Panicked(msg) => write!(f, "listener panicked: {}", msg),
        }
    }
}

/// One listener, bound to one connection.
pub struct Listener {
    source: BoxSource,
    assembler: FrameAssembler,
    router: DispatchRouter,
    read_timeout: Duration,
    generation: u64,
}

impl Listener {
    /// Create a listener for the connection with the given generation.
    pub fn new(
        source: BoxSource,
        assembler: FrameAssembler,
        router: DispatchRouter,
        read_timeout: Duration,
        generation: u64,
    ) -> Self {
        Self {
            source,
            assembler,
            router,
            read_timeout,
            generation,
        }
    }

    /// Generation of the connection this listener reads from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read and route until the connection stops producing data.
    pub async fn run(mut self) -> StopReason {
        tracing::debug!(generation = self.generation, "listener started");

        loop {
            let chunk = match tokio::time::timeout(self.read_timeout, self.source.next_text()).await {
                Err(_) => return StopReason::ReadTimeout(self.read_timeout),
                Ok(Ok(None)) => return StopReason::PeerClosed,
                Ok(Err(e)) => return StopReason::Transport(e.to_string()),
                Ok(Ok(Some(chunk))) => chunk,
            };

            tracing::trace!(len = chunk.len(), "received chunk");

            for message in self.assembler.feed(&chunk) {
                self.router.route(message);
            }

            if !self.assembler.is_empty() {
                tracing::trace!(
                    buffered = self.assembler.len(),
                    "incomplete message buffered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::RequestCorrelator;
    use crate::events::EventHub;
    use crate::transport::memory::MemoryConnector;
    use crate::transport::Connector;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        correlator: Arc<RequestCorrelator>,
        events: Arc<EventHub>,
        listener: Listener,
        peer: crate::transport::memory::MemoryPeer,
    }

    async fn harness(read_timeout: Duration) -> Harness {
        let (connector, mut server) = MemoryConnector::new();
        let (_sink, source) = connector.connect("mem://test").await.unwrap();
        let peer = server.accept().await.unwrap();

        let correlator = Arc::new(RequestCorrelator::new());
        let events = Arc::new(EventHub::new(16));
        let router = DispatchRouter::new(correlator.clone(), events.clone());
        let listener = Listener::new(source, FrameAssembler::new(), router, read_timeout, 1);

        Harness {
            correlator,
            events,
            listener,
            peer,
        }
    }

    #[tokio::test]
    async fn test_routes_until_peer_closes() {
        let mut h = harness(Duration::from_secs(10)).await;
        let call1 = h.correlator.register("1").unwrap();
        let call2 = h.correlator.register("2").unwrap();
        let mut events = h.events.subscribe();

        h.peer
            .send(r#"{"id":"1","result":"a"}{"id":"2","result":"b"}{"method":"sub_push","params":{}}"#);
        h.peer.close();

        assert_eq!(h.listener.run().await, StopReason::PeerClosed);
        assert_eq!(call1.wait().await.unwrap().result, Some(json!("a")));
        assert_eq!(call2.wait().await.unwrap().result, Some(json!("b")));
        assert_eq!(
            events.recv().await.unwrap().method.as_deref(),
            Some("sub_push")
        );
    }

    #[tokio::test]
    async fn test_split_reply_across_chunks() {
        let mut h = harness(Duration::from_secs(10)).await;
        let call = h.correlator.register("1").unwrap();

        h.peer.send(r#"{"id":"1","result":"0x"#);
        h.peer.send(r#"1"}"#);
        h.peer.close();

        h.listener.run().await;
        assert_eq!(call.wait().await.unwrap().result, Some(json!("0x1")));
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_listener() {
        let mut h = harness(Duration::from_secs(10)).await;
        let call = h.correlator.register("7").unwrap();

        h.peer.send("42");
        h.peer.send(r#"{"id":"7","result":true}"#);
        h.peer.close();

        assert_eq!(h.listener.run().await, StopReason::PeerClosed);
        assert_eq!(call.wait().await.unwrap().result, Some(json!(true)));
    }

    #[test]
    fn test_stop_reason_from_panic() {
        let payload: Box<dyn Any + Send> = Box::new("callback failed");
        let reason = StopReason::from_panic(payload.as_ref());
        assert_eq!(reason, StopReason::Panicked("callback failed".to_string()));
        assert_eq!(reason.to_string(), "listener panicked: callback failed");

        let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(
            StopReason::from_panic(payload.as_ref()),
            StopReason::Panicked("code 7".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_stops_listener() {
        let h = harness(Duration::from_secs(10)).await;
        let _peer = h.peer;

        assert_eq!(
            h.listener.run().await,
            StopReason::ReadTimeout(Duration::from_secs(10))
        );
    }
}
