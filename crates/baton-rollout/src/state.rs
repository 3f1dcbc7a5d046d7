//! Controller state: everything guarded by the controller lock.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use baton_core::{Command, ConnectionId, GatewayEvent, LifecycleState, RevisionId, WorkerVersion};
use baton_registry::WorkerRegistry;
use baton_supervisor::RespawnBackoff;

use crate::handoff::{CacheSnapshot, HandoffTable};
use crate::rollback::RollbackManager;

/// Per-connection queue of frames waiting to go out.
pub type Outbox = mpsc::UnboundedSender<GatewayEvent>;

#[derive(Debug)]
pub struct ControllerState {
    pub registry: WorkerRegistry,
    /// The one worker allowed to process live traffic.
    ///
    /// May name an IDENTIFIED worker between a granted `hello` and its
    /// `ready`.
    pub active: Option<ConnectionId>,
    pub cache: CacheSnapshot,
    pub rollback: RollbackManager,
    pub handoffs: HandoffTable,
    pub respawn: RespawnBackoff,
    outboxes: HashMap<ConnectionId, Outbox>,
}

impl ControllerState {
    pub fn new(last_known_good: Option<RevisionId>) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            active: None,
            cache: CacheSnapshot::default(),
            rollback: RollbackManager::new(last_known_good),
            handoffs: HandoffTable::new(),
            respawn: RespawnBackoff::default(),
            outboxes: HashMap::new(),
        }
    }

    pub fn attach(&mut self, id: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(id, outbox);
    }

    /// Drop the outbox; the connection task sees its queue close.
    pub fn detach(&mut self, id: &ConnectionId) {
        self.outboxes.remove(id);
    }

    /// Queue a frame. Returns false if the worker has no live outbox.
    pub fn send(&self, id: &ConnectionId, event: GatewayEvent) -> bool {
        match self.outboxes.get(id) {
            Some(tx) if tx.send(event).is_ok() => true,
            _ => {
                warn!(worker = %id, "no live channel, frame dropped");
                false
            }
        }
    }

    pub fn send_command(&self, id: &ConnectionId, command: Command) -> bool {
        debug!(worker = %id, command = command.name(), "sending command");
        self.send(id, GatewayEvent::Cmd(command))
    }

    pub fn is_active(&self, id: &ConnectionId) -> bool {
        self.active.as_ref() == Some(id)
    }

    pub fn active_version(&self) -> Option<&WorkerVersion> {
        self.active
            .as_ref()
            .and_then(|id| self.registry.version_of(id))
    }

    /// Cross-check `active` against the registry.
    ///
    /// Exactly one ACTIVE record, and it is the one `active` names. A
    /// provisionally granted worker may still be IDENTIFIED or READY.
    pub fn check_invariants(&self) -> Result<(), String> {
        let actives: Vec<&ConnectionId> = self
            .registry
            .iter()
            .filter(|r| r.state == LifecycleState::Active)
            .map(|r| &r.connection_id)
            .collect();
        if actives.len() > 1 {
            return Err(format!("{} workers are ACTIVE: {actives:?}", actives.len()));
        }

        match (&self.active, actives.first()) {
            (None, None) => Ok(()),
            (None, Some(stray)) => Err(format!("{stray} is ACTIVE but no worker is designated")),
            (Some(id), Some(actual)) if id != *actual => {
                Err(format!("designated {id} but {actual} is ACTIVE"))
            }
            (Some(_), Some(_)) => Ok(()),
            (Some(id), None) => match self.registry.state_of(id) {
                Some(LifecycleState::Identified | LifecycleState::Ready) => Ok(()),
                Some(state) => Err(format!("designated {id} is {state}")),
                None => Err(format!("designated {id} is not registered")),
            },
        }
    }

    pub fn snapshot(&self, now: Instant) -> ControllerSnapshot {
        ControllerSnapshot {
            workers: self
                .registry
                .iter()
                .map(|r| WorkerSummary {
                    connection_id: r.connection_id.clone(),
                    version: r.version.as_ref().map(ToString::to_string),
                    state: r.state,
                    last_heartbeat_ms_ago: now
                        .saturating_duration_since(r.last_heartbeat_at)
                        .as_millis() as u64,
                })
                .collect(),
            active: self.active.clone(),
            sane: self.rollback.is_sane(),
            last_known_good: self.rollback.last_known_good().cloned(),
            has_cache: self.cache.blob().is_some(),
            cache_age_ms: self.cache.age(now).map(|d| d.as_millis() as u64),
            pending_handoffs: self.handoffs.len(),
        }
    }
}

/// Point-in-time view for the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub workers: Vec<WorkerSummary>,
    pub active: Option<ConnectionId>,
    pub sane: bool,
    pub last_known_good: Option<RevisionId>,
    pub has_cache: bool,
    pub cache_age_ms: Option<u64>,
    pub pending_handoffs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub connection_id: ConnectionId,
    pub version: Option<String>,
    pub state: LifecycleState,
    pub last_heartbeat_ms_ago: u64,
}
