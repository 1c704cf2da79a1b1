//! Request correlation table.
//!
//! Maps the correlation key of every outstanding call to a single-assignment
//! completion slot (`tokio::sync::oneshot`). Resolution removes the entry
//! atomically, so each key is completed at most once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{ClientError, Result};
use crate::protocol::RpcResponse;

/// What a pending call eventually receives.
pub type Completion = Result<RpcResponse>;

/// Table entry for one outstanding call.
struct Slot {
    /// Distinguishes successive registrations of the same key.
    token: u64,
    tx: oneshot::Sender<Completion>,
}

/// Concurrent map from correlation key to completion slot.
pub struct RequestCorrelator {
    pending: DashMap<String, Slot>,
    next_token: AtomicU64,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a pending call under `key`.
    ///
    /// Fails with [`ClientError::InvalidRequest`] if the key is empty or
    /// already outstanding. The existing entry is left untouched.
    pub fn register(self: &Arc<Self>, key: &str) -> Result<PendingCall> {
        if key.is_empty() {
            return Err(ClientError::InvalidRequest(
                "request id must be non-empty".to_string(),
            ));
        }

        match self.pending.entry(key.to_string()) {
            Entry::Occupied(_) => Err(ClientError::InvalidRequest(format!(
                "request id {} is already outstanding",
                key
            ))),
            Entry::Vacant(vacant) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                vacant.insert(Slot { token, tx });
                Ok(PendingCall {
                    key: key.to_string(),
                    token,
                    rx: Some(rx),
                    correlator: Arc::clone(self),
                })
            }
        }
    }

    /// Complete the call registered under `key` with `reply`.
    ///
    /// Returns false if nothing is pending under that key (unknown id or
    /// already resolved). The caller decides how to report that.
    pub fn resolve(&self, key: &str, reply: RpcResponse) -> bool {
        self.complete(key, Ok(reply))
    }

    /// Complete the call registered under `key` with an error.
    pub fn fail(&self, key: &str, error: ClientError) -> bool {
        self.complete(key, Err(error))
    }

    fn complete(&self, key: &str, completion: Completion) -> bool {
        match self.pending.remove(key) {
            Some((_, slot)) => {
                if slot.tx.send(completion).is_err() {
                    tracing::debug!(id = key, "caller stopped waiting before completion");
                }
                true
            }
            None => false,
        }
    }

    /// Remove the entry under `key` without completing it.
    pub fn remove(&self, key: &str) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Remove the entry only if it is still the registration identified by `token`.
    fn remove_registration(&self, key: &str, token: u64) -> bool {
        self.pending
            .remove_if(key, |_, slot| slot.token == token)
            .is_some()
    }

    /// Fail every outstanding call. Returns how many were failed.
    pub fn fail_all(&self, mut make_error: impl FnMut() -> ClientError) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for key in keys {
            if self.complete(&key, Err(make_error())) {
                failed += 1;
            }
        }
        failed
    }

    /// Check whether `key` is outstanding.
    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no call is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller side of one registration.
///
/// Dropping it before completion removes the table entry, so cancelled or
/// failed sends never leak slots.
pub struct PendingCall {
    key: String,
    token: u64,
    rx: Option<oneshot::Receiver<Completion>>,
    correlator: Arc<RequestCorrelator>,
}

impl PendingCall {
    /// Correlation key of this call.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the completion.
    pub async fn wait(mut self) -> Completion {
        let rx = match self.rx.take() {
            Some(rx) => rx,
            None => return Err(ClientError::ClientClosed),
        };
        match rx.await {
            Ok(completion) => completion,
            // Slot dropped without completion: the table was torn down.
            Err(_) => Err(ClientError::ClientClosed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.rx.is_some() && self.correlator.remove_registration(&self.key, self.token) {
            tracing::debug!(id = %self.key, "pending call dropped before completion");
        }
    }
}
