//! Worker registry: tracks every connected worker by connection id.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::{debug, info};

use baton_core::{ConnectionId, LifecycleState, WorkerVersion};

use crate::error::{RegistryError, RegistryResult};

/// Bookkeeping for one connected worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    pub connection_id: ConnectionId,
    /// Set by `hello`; `None` while still CONNECTED.
    pub version: Option<WorkerVersion>,
    pub last_heartbeat_at: Instant,
    pub state: LifecycleState,
}

/// All connected workers, keyed by connection id.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<ConnectionId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened channel.
    ///
    /// Registering an id twice leaves the existing record untouched.
    pub fn register(&mut self, id: ConnectionId, now: Instant) -> &WorkerRecord {
        self.workers.entry(id.clone()).or_insert_with(|| {
            debug!(worker = %id, "worker connected");
            WorkerRecord {
                connection_id: id,
                version: None,
                last_heartbeat_at: now,
                state: LifecycleState::Connected,
            }
        })
    }

    /// Record the version from `hello` and move CONNECTED → IDENTIFIED.
    pub fn identify(&mut self, id: &ConnectionId, version: WorkerVersion) -> RegistryResult<()> {
        let record = self.get_mut(id)?;
        if record.state != LifecycleState::Connected {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from: record.state,
                to: LifecycleState::Identified,
            });
        }
        info!(worker = %id, %version, "worker identified");
        record.version = Some(version);
        record.state = LifecycleState::Identified;
        Ok(())
    }

    /// IDENTIFIED → READY.
    pub fn mark_ready(&mut self, id: &ConnectionId) -> RegistryResult<()> {
        let record = self.get_mut(id)?;
        if record.state != LifecycleState::Identified {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from: record.state,
                to: LifecycleState::Ready,
            });
        }
        record.state = LifecycleState::Ready;
        debug!(worker = %id, "worker ready");
        Ok(())
    }

    /// Move a worker along any legal lifecycle edge.
    ///
    /// Returns the state it left.
    pub fn transition(
        &mut self,
        id: &ConnectionId,
        to: LifecycleState,
    ) -> RegistryResult<LifecycleState> {
        let record = self.get_mut(id)?;
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }
        record.state = to;
        debug!(worker = %id, %from, %to, "worker state changed");
        Ok(from)
    }

    /// Forget a worker. Absent ids are a no-op.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<WorkerRecord> {
        let removed = self.workers.remove(id);
        if removed.is_some() {
            info!(worker = %id, "worker removed from registry");
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&WorkerRecord> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn state_of(&self, id: &ConnectionId) -> Option<LifecycleState> {
        self.workers.get(id).map(|r| r.state)
    }

    pub fn version_of(&self, id: &ConnectionId) -> Option<&WorkerVersion> {
        self.workers.get(id).and_then(|r| r.version.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.workers.values()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of workers currently in `state`.
    pub fn count_in(&self, state: LifecycleState) -> usize {
        self.workers.values().filter(|r| r.state == state).count()
    }

    /// Ids of workers in the ready set (READY, STANDBY, COMA).
    pub fn ready_set(&self) -> Vec<ConnectionId> {
        self.workers
            .values()
            .filter(|r| r.state.is_ready_set())
            .map(|r| r.connection_id.clone())
            .collect()
    }

    pub(crate) fn get_mut(&mut self, id: &ConnectionId) -> RegistryResult<&mut WorkerRecord> {
        self.workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownWorker(id.clone()))
    }
}
