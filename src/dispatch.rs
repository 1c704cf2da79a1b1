//! Dispatch router: replies go to the correlator, events to the event hub.

use std::sync::Arc;

use crate::correlator::RequestCorrelator;
use crate::events::{Diagnostic, EventHub};
use crate::protocol::Message;

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// A pending call was resolved.
    Resolved,
    /// Reply for an id with no pending call; dropped.
    Unmatched,
    /// Delivered to the event hub.
    Event,
    /// Neither reply nor event; dropped.
    Dropped,
}

/// Routes assembled messages.
#[derive(Clone)]
pub struct DispatchRouter {
    correlator: Arc<RequestCorrelator>,
    events: Arc<EventHub>,
}

impl DispatchRouter {
    /// Create a router over a correlator and an event hub.
    pub fn new(correlator: Arc<RequestCorrelator>, events: Arc<EventHub>) -> Self {
        Self { correlator, events }
    }

    /// Route one message.
    pub fn route(&self, message: Message) -> Routed {
        match message {
            Message::Reply(reply) => {
                let key = reply.id.correlation_key();
                if self.correlator.resolve(&key, reply) {
                    tracing::trace!(id = %key, "reply matched pending request");
                    self.events.diagnose(Diagnostic::ReplyReceived { id: key });
                    Routed::Resolved
                } else {
                    tracing::warn!(id = %key, "unable to match response id with a pending request");
                    self.events.diagnose(Diagnostic::UnmatchedReply { id: key });
                    Routed::Unmatched
                }
            }
            Message::Event(event) => {
                tracing::trace!(method = ?event.method, "push event");
                self.events.publish(event);
                Routed::Event
            }
            Message::Unrecognized { raw, reason } => {
                tracing::warn!(%reason, "dropping unrecognized message");
                self.events
                    .diagnose(Diagnostic::UnrecognizedMessage { raw, reason });
                Routed::Dropped
            }
        }
    }
}
