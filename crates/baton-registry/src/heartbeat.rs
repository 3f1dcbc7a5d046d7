//! Heartbeat monitor: per-worker liveness.
//!
//! Every inbound event refreshes a worker's `last_heartbeat_at`. A periodic
//! scan compares the silence against `interval × multiplier`; transport
//! failures are not always visible as disconnects, so the scan is the
//! authoritative liveness check.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use baton_core::ConnectionId;

use crate::error::RegistryResult;
use crate::registry::WorkerRegistry;

/// Liveness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Interval advertised to workers.
    interval: Duration,
    /// Missed-interval multiplier before a worker counts as gone.
    multiplier: u32,
}

impl HeartbeatPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            multiplier: 2,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    /// Longest tolerated silence.
    pub fn max_silence(&self) -> Duration {
        self.interval * self.multiplier
    }

    /// Refresh a worker's last-seen time.
    ///
    /// Returns the gap since the previous event from that worker.
    pub fn touch(
        &self,
        registry: &mut WorkerRegistry,
        id: &ConnectionId,
        now: Instant,
    ) -> RegistryResult<Duration> {
        let record = registry.get_mut(id)?;
        let gap = now.saturating_duration_since(record.last_heartbeat_at);
        record.last_heartbeat_at = now;
        Ok(gap)
    }

    /// Workers silent for longer than [`max_silence`](Self::max_silence).
    pub fn silent_workers(&self, registry: &WorkerRegistry, now: Instant) -> Vec<ConnectionId> {
        let max_silence = self.max_silence();
        let silent: Vec<ConnectionId> = registry
            .iter()
            .filter(|r| now.saturating_duration_since(r.last_heartbeat_at) > max_silence)
            .map(|r| r.connection_id.clone())
            .collect();

        for id in &silent {
            warn!(worker = %id, ?max_silence, "worker missed heartbeats");
        }
        if silent.is_empty() {
            debug!(workers = registry.len(), "heartbeat scan clean");
        }
        silent
    }
}
