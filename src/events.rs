//! Push-event delivery and diagnostics.
//!
//! Every classified event is delivered to:
//! - callbacks registered on the [`ClientBuilder`](crate::ClientBuilder), and
//! - every live [`EventSubscription`] (a `tokio::sync::broadcast` receiver;
//!   dropping it unsubscribes).
//!
//! Diagnostic callbacks observe transport-internal happenings such as replies
//! for unknown ids. They are optional and never affect delivery.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::StreamingMessage;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Callback invoked for every push event.
pub type EventCallback = Arc<dyn Fn(&StreamingMessage) + Send + Sync>;

/// Callback invoked for every diagnostic.
pub type DiagnosticCallback = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Observable transport happenings that are not errors of any call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A connection was opened.
    Connected {
        /// Connection generation, starting at 1.
        generation: u64,
    },
    /// A reply resolved its pending call.
    ReplyReceived {
        /// Correlation key.
        id: String,
    },
    /// A reply arrived for an id with no pending call; it was dropped.
    UnmatchedReply {
        /// Correlation key.
        id: String,
    },
    /// Well-formed input that was neither a reply nor an event.
    UnrecognizedMessage {
        /// Truncated raw text.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The background listener stopped.
    ListenerStopped {
        /// Why it stopped.
        reason: String,
        /// Pending calls failed as a consequence.
        failed_requests: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Connected { generation } => write!(f, "connected (generation {})", generation),
            Diagnostic::ReplyReceived { id } => write!(f, "reply received for id {}", id),
            Diagnostic::UnmatchedReply { id } => write!(f, "response for unknown id {}", id),
            Diagnostic::UnrecognizedMessage { reason, .. } => {
                write!(f, "unrecognized message: {}", reason)
            }
            Diagnostic::ListenerStopped {
                reason,
                failed_requests,
            } => write!(
                f,
                "listener stopped: {} ({} pending requests failed)",
                reason, failed_requests
            ),
        }
    }
}

/// Fan-out point for events and diagnostics.
pub struct EventHub {
    tx: broadcast::Sender<StreamingMessage>,
    callbacks: Vec<EventCallback>,
    diagnostics: Vec<DiagnosticCallback>,
}

impl EventHub {
    /// Create a hub with the given broadcast capacity and no callbacks.
    pub fn new(capacity: usize) -> Self {
        Self::with_callbacks(capacity, Vec::new(), Vec::new())
    }

    /// Create a hub with callbacks fixed at construction.
    pub fn with_callbacks(
        capacity: usize,
        callbacks: Vec<EventCallback>,
        diagnostics: Vec<DiagnosticCallback>,
    ) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            callbacks,
            diagnostics,
        }
    }

    /// Deliver a push event to callbacks and subscribers.
    pub fn publish(&self, event: StreamingMessage) {
        for callback in &self.callbacks {
            callback(&event);
        }
        // No live subscribers is not an error.
        let _ = self.tx.send(event);
    }

    /// Report a diagnostic to the registered observers.
    pub fn diagnose(&self, diagnostic: Diagnostic) {
        for observer in &self.diagnostics {
            observer(&diagnostic);
        }
    }

    /// Open a new subscription. Only events published afterwards are seen.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Runtime registration for push events. Drop to unsubscribe.
pub struct EventSubscription {
    rx: broadcast::Receiver<StreamingMessage>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` once the client is gone.
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// the overwritten events and continues with the oldest retained one.
    pub async fn recv(&mut self) -> Option<StreamingMessage> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<StreamingMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event(n: i64) -> StreamingMessage {
        StreamingMessage {
            jsonrpc: "2.0".to_string(),
            method: Some("sub_push".to_string()),
            params: Some(json!({"subscription": "0x1", "result": n})),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = EventHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(event(1));

        assert_eq!(a.recv().await.unwrap().result(), Some(&json!(1)));
        assert_eq!(b.recv().await.unwrap().result(), Some(&json!(1)));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = EventHub::new(16);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);

        // Publishing with nobody listening is fine
        hub.publish(event(1));
    }

    #[test]
    fn test_callbacks_invoked() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let callback: EventCallback = Arc::new(move |_event| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let hub = EventHub::with_callbacks(16, vec![callback], Vec::new());
        hub.publish(event(1));
        hub.publish(event(2));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diagnostics_invoked() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let observer: DiagnosticCallback = Arc::new(move |d| {
            seen_clone.lock().unwrap().push(d.clone());
        });

        let hub = EventHub::with_callbacks(16, Vec::new(), vec![observer]);
        hub.diagnose(Diagnostic::UnmatchedReply { id: "3".to_string() });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to_string(), "response for unknown id 3");
    }

    #[test]
    fn test_lagged_subscriber_continues() {
        let hub = EventHub::new(2);
        let mut sub = hub.subscribe();

        for n in 0..5 {
            hub.publish(event(n));
        }

        // Oldest retained events come back after the lag
        assert_eq!(sub.try_recv().unwrap().result(), Some(&json!(3)));
        assert_eq!(sub.try_recv().unwrap().result(), Some(&json!(4)));
        assert!(sub.try_recv().is_none());
    }
}
