//! Rollout controller: decides which worker is active.
//!
//! Every worker event funnels through [`Controller::handle`]. Decisions
//! that read and then write shared state (granting `hello`, comparing
//! versions on `ready`, committing a promotion, evicting) each happen in
//! one critical section of the state lock.
//!
//! Promotion over a running worker waits for its cache. That wait holds
//! only the promotion lock, so heartbeats and other frames keep flowing;
//! the candidate is re-validated once the wait is over.
//!
//! Rollbacks and pulls share one source tree, so they take the
//! source-tree lock and run one at a time. The state lock is never held
//! while waiting for it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use baton_core::config::{BatonConfig, Mode, RetireMode};
use baton_core::{
    Command, ConnectionId, GatewayEvent, HealthReport, LifecycleState, ProtocolError, RevisionId,
    WorkerEvent, WorkerVersion,
};
use baton_health::{HealthGate, Verdict};
use baton_registry::HeartbeatPolicy;
use baton_supervisor::{
    ProcessHandle, ProcessSupervisor, RespawnBackoff, SourceControl, SourceControlError,
    SpawnError, SpawnTarget,
};

use crate::ALERT_TARGET;
use crate::handoff::await_reply;
use crate::rollback::{RollbackFailure, RollbackManager};
use crate::state::{ControllerSnapshot, ControllerState, Outbox};

/// Shutdown reasons that roll the source tree back first.
const HEALTH_FAILURE_REASONS: [&str; 2] = ["vital_subsystem_failure", "health_check_failure"];

#[derive(Debug, Clone)]
pub struct RolloutSettings {
    /// Credential handed to workers in `hello` and `process_commands`.
    pub token: Option<String>,
    pub heartbeat: HeartbeatPolicy,
    pub handoff_timeout: Duration,
    pub retire_previous: RetireMode,
    pub mode: Mode,
    pub spawn_target: SpawnTarget,
}

impl RolloutSettings {
    pub fn from_config(config: &BatonConfig) -> Self {
        Self {
            token: config.worker.token.clone(),
            heartbeat: HeartbeatPolicy::new(config.heartbeat_interval())
                .with_multiplier(config.gateway.heartbeat_multiplier),
            handoff_timeout: config.handoff_timeout(),
            retire_previous: config.rollout.retire_previous,
            mode: config.gateway.mode,
            spawn_target: SpawnTarget::from_config(config),
        }
    }
}

/// What happened when the active worker was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnDecision {
    /// A spawn will run after this delay.
    Scheduled(Duration),
    /// Gateway is not sane; nothing will run until `try_again`.
    Halted,
    /// Development mode.
    Skipped,
}

pub struct Controller {
    state: Mutex<ControllerState>,
    promotion: Mutex<()>,
    /// Revision the last rollback landed on, cleared when a pull moves
    /// the tree.
    source_tree: Mutex<Option<RevisionId>>,
    gate: HealthGate,
    source: Arc<dyn SourceControl>,
    supervisor: Arc<dyn ProcessSupervisor>,
    settings: RolloutSettings,
}

impl Controller {
    pub fn new(
        settings: RolloutSettings,
        gate: HealthGate,
        source: Arc<dyn SourceControl>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState::new(None)),
            promotion: Mutex::new(()),
            source_tree: Mutex::new(None),
            gate,
            source,
            supervisor,
            settings,
        }
    }

    /// Build a controller with every policy taken from `config`.
    pub fn from_config(
        config: &BatonConfig,
        source: Arc<dyn SourceControl>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self::new(
            RolloutSettings::from_config(config),
            HealthGate::from_config(&config.health),
            source,
            supervisor,
        )
        .with_respawn_backoff(RespawnBackoff::new(
            config.respawn_base_delay(),
            config.respawn_max_delay(),
            config.respawn_window(),
        ))
    }

    /// Seed the rollback target, usually the revision checked out at startup.
    pub fn with_last_known_good(mut self, revision: Option<RevisionId>) -> Self {
        self.state.get_mut().rollback = RollbackManager::new(revision);
        self
    }

    pub fn with_respawn_backoff(mut self, backoff: RespawnBackoff) -> Self {
        self.state.get_mut().respawn = backoff;
        self
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    // ── Channel lifecycle ─────────────────────────────────────────

    /// Track a newly opened channel.
    pub async fn connect(&self, id: ConnectionId, outbox: Outbox) {
        let mut state = self.state.lock().await;
        state.registry.register(id.clone(), Instant::now());
        state.attach(id, outbox);
    }

    /// The channel closed.
    pub async fn disconnect(self: &Arc<Self>, id: &ConnectionId) {
        let was_active = {
            let mut state = self.state.lock().await;
            evict_locked(&mut state, id)
        };
        if was_active {
            self.respawn_if_needed().await;
        }
    }

    /// Evict every worker that stopped beating. Returns the evicted ids.
    pub async fn reap_silent(self: &Arc<Self>, now: Instant) -> Vec<ConnectionId> {
        let (silent, lost_active) = {
            let mut state = self.state.lock().await;
            let silent = self.settings.heartbeat.silent_workers(&state.registry, now);
            let mut lost_active = false;
            for id in &silent {
                lost_active |= evict_locked(&mut state, id);
            }
            (silent, lost_active)
        };
        if lost_active {
            self.respawn_if_needed().await;
        }
        silent
    }

    /// A frame from `id` could not be decoded.
    pub async fn malformed(self: &Arc<Self>, id: &ConnectionId, err: &ProtocolError) {
        let was_active = {
            let mut state = self.state.lock().await;
            if state.is_active(id) {
                state.send_command(
                    id,
                    Command::Shutdown {
                        reason: "malformed_message".to_string(),
                    },
                );
            }
            error!(
                target: ALERT_TARGET,
                worker = %id,
                error = %err,
                "malformed message, evicting connection"
            );
            evict_locked(&mut state, id)
        };
        if was_active {
            self.respawn_if_needed().await;
        }
    }

    // ── Event dispatch ────────────────────────────────────────────

    /// Apply one decoded event from `id`.
    pub async fn handle(&self, id: &ConnectionId, event: WorkerEvent) {
        let touched = {
            let mut state = self.state.lock().await;
            self.settings
                .heartbeat
                .touch(&mut state.registry, id, Instant::now())
        };
        let gap = match (touched, &event) {
            (Ok(gap), _) => gap,
            (Err(_), WorkerEvent::TryAgain) => Duration::ZERO,
            (Err(e), _) => {
                warn!(worker = %id, event = event.name(), error = %e, "event ignored");
                return;
            }
        };
        debug!(worker = %id, event = event.name(), "event received");

        match event {
            WorkerEvent::Hello { version } => self.on_hello(id, version).await,
            WorkerEvent::Heartbeat => self.on_heartbeat(id, gap).await,
            WorkerEvent::Ready => self.on_ready(id).await,
            WorkerEvent::HealthCheck(report) => self.on_health_check(id, report).await,
            WorkerEvent::Coma { reason } => self.on_coma(id, reason).await,
            WorkerEvent::Shutdown { reason } => self.on_shutdown_ack(id, reason).await,
            WorkerEvent::CacheSync { cache } => self.on_cache_sync(id, cache).await,
            WorkerEvent::TryAgain => {
                if self.try_again().await.is_err() {
                    warn!(worker = %id, "try_again spawn failed");
                }
            }
        }
    }

    async fn on_hello(&self, id: &ConnectionId, version: WorkerVersion) {
        let mut state = self.state.lock().await;
        if let Err(e) = state.registry.identify(id, version.clone()) {
            warn!(worker = %id, error = %e, "hello ignored");
            return;
        }

        let grant = state.active.is_none() && state.rollback.is_sane();
        if grant {
            info!(worker = %id, %version, "no active worker, granting live traffic");
            state.active = Some(id.clone());
        } else {
            debug!(worker = %id, %version, "worker joins as candidate");
        }

        state.send(
            id,
            GatewayEvent::Hello {
                interval: self.settings.heartbeat.interval_ms(),
                token: self.settings.token.clone(),
                process_commands: grant,
            },
        );
    }

    async fn on_heartbeat(&self, id: &ConnectionId, gap: Duration) {
        let state = self.state.lock().await;
        state.send(
            id,
            GatewayEvent::HeartbeatAck {
                since_last_beat: gap.as_millis() as u64,
            },
        );
    }

    async fn on_ready(&self, id: &ConnectionId) {
        let mut state = self.state.lock().await;
        if let Err(e) = state.registry.mark_ready(id) {
            warn!(worker = %id, error = %e, "ready ignored");
            return;
        }

        if state.is_active(id) {
            if let Err(e) = state.registry.transition(id, LifecycleState::Active) {
                warn!(worker = %id, error = %e, "could not confirm active worker");
                return;
            }
            info!(worker = %id, "active worker confirmed");
            state.send_command(id, Command::Ok);
            return;
        }

        if !state.rollback.is_sane() {
            warn!(worker = %id, "rollouts halted, candidate left waiting");
            return;
        }

        let candidate = state.registry.version_of(id).cloned();
        let active = state.active_version().cloned();
        match (candidate, active) {
            (_, None) => {
                info!(worker = %id, "no active worker, asking candidate for health");
                state.send_command(id, Command::HealthCheck {});
            }
            (Some(candidate), Some(active)) if candidate > active => {
                info!(worker = %id, %candidate, %active, "newer candidate, asking for health");
                state.send_command(id, Command::HealthCheck {});
            }
            (candidate, Some(active)) => {
                debug!(worker = %id, ?candidate, %active, "candidate not newer, staying ready");
            }
        }
    }

    async fn on_health_check(&self, id: &ConnectionId, report: HealthReport) {
        {
            let state = self.state.lock().await;
            if let Err(why) = validate_candidate(&state, id) {
                warn!(worker = %id, why, "health report ignored");
                return;
            }
        }

        match self.gate.evaluate(&report) {
            Verdict::Fail(reason) => {
                warn!(
                    worker = %id,
                    %reason,
                    worker_reason = ?report.reason,
                    "candidate failed health gate"
                );
                self.shutdown(id, reason.shutdown_reason()).await;
            }
            Verdict::Pass => {
                info!(worker = %id, percent = report.percent, "candidate passed health gate");
                self.promote(id).await;
            }
        }
    }

    async fn on_coma(&self, id: &ConnectionId, reason: Option<String>) {
        let mut state = self.state.lock().await;
        if state.registry.state_of(id) != Some(LifecycleState::Standby) {
            debug!(worker = %id, "coma ack from non-standby worker ignored");
            return;
        }
        if state.registry.transition(id, LifecycleState::Coma).is_ok() {
            info!(worker = %id, ?reason, "worker entered coma");
        }
    }

    async fn on_shutdown_ack(&self, id: &ConnectionId, reason: Option<String>) {
        let mut state = self.state.lock().await;
        if state.is_active(id) {
            warn!(worker = %id, ?reason, "active worker announced shutdown");
            return;
        }
        match state.registry.transition(id, LifecycleState::Terminated) {
            Ok(_) => info!(worker = %id, ?reason, "worker shutting down"),
            Err(e) => debug!(worker = %id, error = %e, "shutdown ack ignored"),
        }
    }

    async fn on_cache_sync(&self, id: &ConnectionId, cache: Option<Value>) {
        let mut state = self.state.lock().await;
        if let Some(reply) = state.handoffs.take(id) {
            debug!(worker = %id, "handoff reply received");
            if reply.send(cache).is_err() {
                debug!(worker = %id, "handoff waiter already gone");
            }
            return;
        }

        let Some(cache) = cache else {
            debug!(worker = %id, "empty cache_sync ignored");
            return;
        };

        if state.is_active(id) {
            let peers: Vec<ConnectionId> = state
                .registry
                .ready_set()
                .into_iter()
                .filter(|peer| peer != id)
                .collect();
            debug!(worker = %id, peers = peers.len(), "replicating cache to peers");
            for peer in &peers {
                state.send(
                    peer,
                    GatewayEvent::CacheSync {
                        cache: Some(cache.clone()),
                    },
                );
            }
        } else if let Some(active) = state.active.clone() {
            debug!(worker = %id, %active, "forwarding cache to active worker");
            state.send(&active, GatewayEvent::CacheSync { cache: Some(cache) });
        } else {
            debug!(worker = %id, "no active worker to forward cache to");
        }
    }

    // ── Promotion ─────────────────────────────────────────────────

    async fn promote(&self, id: &ConnectionId) {
        let revision = self.current_revision().await;
        let _promotion = self.promotion.lock().await;

        let (outgoing, reply) = {
            let mut state = self.state.lock().await;
            if let Err(why) = validate_candidate(&state, id) {
                warn!(worker = %id, why, "promotion abandoned");
                return;
            }
            match revision {
                Ok(revision) => state.rollback.record_good(revision),
                Err(e) => {
                    warn!(error = %e, "could not read current revision, known-good unchanged")
                }
            }

            let outgoing = state.active.clone();
            let mut reply = None;
            if let Some(prev) = &outgoing {
                let rx = state.handoffs.open(prev);
                if state.send(prev, GatewayEvent::CacheSync { cache: None }) {
                    debug!(worker = %prev, "requested cache from outgoing worker");
                } else {
                    state.handoffs.abandon(prev);
                }
                reply = Some(rx);
            }
            (outgoing, reply)
        };

        let handed_off = match reply {
            Some(rx) => Some(await_reply(rx, self.settings.handoff_timeout).await),
            None => None,
        };

        let mut state = self.state.lock().await;
        if let Some(prev) = &outgoing {
            state.handoffs.abandon(prev);
        }
        if let Err(why) = validate_candidate(&state, id) {
            warn!(worker = %id, why, "candidate lost during handoff");
            return;
        }

        let now = Instant::now();
        match handed_off {
            Some(Ok(blob)) => {
                info!(worker = %id, "cache handed off");
                state.cache.store(blob, now);
            }
            Some(Err(e)) => {
                let cache_age_ms = state.cache.age(now).map(|age| age.as_millis() as u64);
                warn!(error = %e, ?cache_age_ms, "handoff degraded, using last known cache");
            }
            None => debug!(worker = %id, "no outgoing worker, nothing to hand off"),
        }

        if let Err(e) = state.registry.transition(id, LifecycleState::Active) {
            error!(worker = %id, error = %e, "promotion failed");
            return;
        }
        if let Some(prev) = state.active.clone().filter(|prev| prev != id) {
            self.retire(&mut state, &prev);
        }
        state.active = Some(id.clone());

        let version = state.registry.version_of(id).cloned();
        let cache = state.cache.blob().cloned();
        state.send_command(
            id,
            Command::ProcessCommands {
                stop: false,
                cache,
                token: self.settings.token.clone(),
                reason: Some("promoted".to_string()),
            },
        );
        info!(worker = %id, ?version, "candidate promoted to active");
    }

    fn retire(&self, state: &mut ControllerState, prev: &ConnectionId) {
        let reason = "superseded".to_string();
        match self.settings.retire_previous {
            RetireMode::Coma => {
                if state.registry.state_of(prev) == Some(LifecycleState::Active) {
                    if let Err(e) = state.registry.transition(prev, LifecycleState::Standby) {
                        warn!(worker = %prev, error = %e, "could not demote previous active");
                    }
                }
                state.send_command(prev, Command::Coma { reason });
            }
            RetireMode::Shutdown => {
                if let Err(e) = state.registry.transition(prev, LifecycleState::Terminated) {
                    warn!(worker = %prev, error = %e, "could not terminate previous active");
                }
                state.send_command(prev, Command::Shutdown { reason });
            }
        }
        info!(worker = %prev, mode = ?self.settings.retire_previous, "previous active retired");
    }

    // ── Commands ──────────────────────────────────────────────────

    /// Tell a worker to exit.
    ///
    /// Health-failure reasons roll the source tree back first. The worker
    /// is told to shut down whether or not the rollback succeeded.
    pub async fn shutdown(&self, id: &ConnectionId, reason: &str) {
        if HEALTH_FAILURE_REASONS.contains(&reason) {
            self.rollback().await;
        }

        let mut state = self.state.lock().await;
        if state.is_active(id) {
            warn!(worker = %id, reason, "shutting down the active worker");
            state.active = None;
        }
        if let Err(e) = state.registry.transition(id, LifecycleState::Terminated) {
            debug!(worker = %id, error = %e, "shutdown target not tracked");
        }
        state.send_command(
            id,
            Command::Shutdown {
                reason: reason.to_string(),
            },
        );
    }

    async fn rollback(&self) {
        if self.settings.mode == Mode::Development {
            info!("development mode, rollback skipped");
            return;
        }

        let mut tree = self.source_tree.lock().await;
        let job = self.state.lock().await.rollback.begin(Arc::clone(&self.source));
        if let Some(target) = job.target() {
            if (*tree).as_ref() == Some(target) {
                info!(revision = %target, "tree already rolled back, reset skipped");
                return;
            }
        }

        let outcome = tokio::task::spawn_blocking(move || job.run())
            .await
            .unwrap_or_else(|e| {
                Err(RollbackFailure::SourceControl(format!(
                    "rollback task failed: {e}"
                )))
            });
        *tree = outcome.as_ref().ok().cloned();
        self.state.lock().await.rollback.finish(&outcome);
    }

    /// Operator recovery: clear the sane flag and the respawn history,
    /// then spawn a worker right away.
    pub async fn try_again(&self) -> Result<ProcessHandle, SpawnError> {
        {
            let mut state = self.state.lock().await;
            state.rollback.clear_sane();
            state.respawn.reset();
        }
        info!("try_again received, spawning a worker");
        self.spawn_worker().await
    }

    // ── Processes and source tree ─────────────────────────────────

    /// Called when the active worker is lost.
    pub async fn respawn_if_needed(self: &Arc<Self>) -> RespawnDecision {
        let delay = {
            let mut state = self.state.lock().await;
            if !state.rollback.is_sane() {
                error!(
                    target: ALERT_TARGET,
                    "active worker lost while halted, developer intervention required"
                );
                return RespawnDecision::Halted;
            }
            if self.settings.mode == Mode::Development {
                info!("development mode, respawn skipped");
                return RespawnDecision::Skipped;
            }
            state.respawn.next_delay(Instant::now())
        };

        info!(?delay, "respawn scheduled");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            {
                let state = this.state.lock().await;
                if !state.rollback.is_sane() {
                    warn!("gateway halted during backoff, respawn cancelled");
                    return;
                }
                if let Some(active) = &state.active {
                    info!(%active, "active worker present, respawn cancelled");
                    return;
                }
            }
            if this.spawn_worker().await.is_err() {
                debug!("respawn left for the next cycle");
            }
        });
        RespawnDecision::Scheduled(delay)
    }

    /// Launch a worker process off the executor.
    pub async fn spawn_worker(&self) -> Result<ProcessHandle, SpawnError> {
        let supervisor = Arc::clone(&self.supervisor);
        let target = self.settings.spawn_target.clone();
        let result = tokio::task::spawn_blocking(move || supervisor.spawn(&target))
            .await
            .unwrap_or_else(|e| Err(SpawnError::Task(e.to_string())));
        match &result {
            Ok(handle) => {
                info!(pid = handle.pid, log = %handle.log_path.display(), "worker spawned")
            }
            Err(e) => error!(target: ALERT_TARGET, error = %e, "process spawn failed"),
        }
        result
    }

    /// Pull the tracked branch off the executor.
    pub async fn pull_source(&self) -> Result<String, SourceControlError> {
        let mut tree = self.source_tree.lock().await;
        let source = Arc::clone(&self.source);
        let result = tokio::task::spawn_blocking(move || source.pull())
            .await
            .unwrap_or_else(|e| Err(blocking_task_failed("pull", e)));
        // Even a failed pull may have moved HEAD.
        *tree = None;
        result
    }

    async fn current_revision(&self) -> Result<RevisionId, SourceControlError> {
        let _tree = self.source_tree.lock().await;
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.current_revision())
            .await
            .unwrap_or_else(|e| Err(blocking_task_failed("rev-parse", e)))
    }

    // ── Introspection ─────────────────────────────────────────────

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.state.lock().await.snapshot(Instant::now())
    }

    pub async fn check_invariants(&self) -> Result<(), String> {
        self.state.lock().await.check_invariants()
    }
}

/// Remove a worker and everything attached to it.
///
/// Returns true if it was the active worker.
fn evict_locked(state: &mut ControllerState, id: &ConnectionId) -> bool {
    state.registry.remove(id);
    state.detach(id);
    state.handoffs.abandon(id);
    let was_active = state.is_active(id);
    if was_active {
        warn!(worker = %id, "active worker lost");
        state.active = None;
    }
    was_active
}

/// Is `id` still a READY, not-yet-active worker newer than the active one?
fn validate_candidate(state: &ControllerState, id: &ConnectionId) -> Result<(), &'static str> {
    match state.registry.state_of(id) {
        Some(LifecycleState::Ready) => {}
        Some(_) => return Err("not ready"),
        None => return Err("not connected"),
    }
    if state.is_active(id) {
        return Err("already active");
    }
    if !state.rollback.is_sane() {
        return Err("rollouts halted");
    }
    if let Some(active) = state.active_version() {
        match state.registry.version_of(id) {
            Some(candidate) if candidate > active => {}
            _ => return Err("not newer than active"),
        }
    }
    Ok(())
}

fn blocking_task_failed(command: &str, e: tokio::task::JoinError) -> SourceControlError {
    SourceControlError::Io {
        command: command.to_string(),
        source: std::io::Error::other(e.to_string()),
    }
}
