//! Cache handoff between the outgoing and incoming active worker.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use baton_core::ConnectionId;

/// Last cache blob received from an outgoing active worker.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    blob: Option<Value>,
    captured_at: Option<Instant>,
}

impl CacheSnapshot {
    pub fn store(&mut self, blob: Value, now: Instant) {
        self.blob = Some(blob);
        self.captured_at = Some(now);
    }

    pub fn blob(&self) -> Option<&Value> {
        self.blob.as_ref()
    }

    /// Time since capture; `None` if nothing was ever captured.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.captured_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// Why a handoff produced no fresh snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("no cache reply within {0:?}")]
    TimedOut(Duration),

    #[error("outgoing worker went away before replying")]
    Abandoned,

    #[error("outgoing worker replied with an empty cache")]
    Empty,
}

/// Pending cache requests, one slot per outgoing worker.
#[derive(Debug, Default)]
pub struct HandoffTable {
    pending: HashMap<ConnectionId, oneshot::Sender<Option<Value>>>,
}

impl HandoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for `id`, replacing any earlier one.
    pub fn open(&mut self, id: &ConnectionId) -> oneshot::Receiver<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(id.clone(), tx).is_some() {
            debug!(worker = %id, "replaced stale handoff slot");
        }
        rx
    }

    /// Claim the slot so a reply can be delivered.
    pub fn take(&mut self, id: &ConnectionId) -> Option<oneshot::Sender<Option<Value>>> {
        self.pending.remove(id)
    }

    /// Drop the slot. The waiter sees [`HandoffError::Abandoned`].
    pub fn abandon(&mut self, id: &ConnectionId) {
        if self.pending.remove(id).is_some() {
            debug!(worker = %id, "handoff slot abandoned");
        }
    }

    pub fn is_pending(&self, id: &ConnectionId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wait for one reply on a handoff slot.
pub async fn await_reply(
    rx: oneshot::Receiver<Option<Value>>,
    timeout: Duration,
) -> Result<Value, HandoffError> {
    match tokio::time::timeout(timeout, rx).await {
        Err(_) => Err(HandoffError::TimedOut(timeout)),
        Ok(Err(_)) => Err(HandoffError::Abandoned),
        Ok(Ok(None)) | Ok(Ok(Some(Value::Null))) => Err(HandoffError::Empty),
        Ok(Ok(Some(blob))) => Ok(blob),
    }
}
