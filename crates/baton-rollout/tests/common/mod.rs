//! Shared harness: a controller wired to in-memory source control and
//! process supervisor, plus helpers that speak the wire protocol.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use baton_core::config::{Mode, RetireMode};
use baton_core::{Command, ConnectionId, GatewayEvent, RevisionId, WorkerEvent};
use baton_health::HealthGate;
use baton_registry::HeartbeatPolicy;
use baton_rollout::{Controller, RolloutSettings};
use baton_supervisor::{
    ProcessHandle, ProcessSupervisor, RespawnBackoff, SourceControl, SourceControlError,
    SpawnError, SpawnTarget,
};

pub const KNOWN_GOOD: &str = "rev-good";
pub const HEAD: &str = "rev-head";

/// Source tree kept in memory. Resets land on the requested revision
/// unless `land_on` says otherwise.
pub struct FakeSource {
    head: Mutex<RevisionId>,
    resets: Mutex<Vec<RevisionId>>,
    land_on: Mutex<Option<RevisionId>>,
    pulls: AtomicUsize,
    /// How long each reset or pull holds the tree.
    latency: Mutex<Duration>,
    busy: AtomicUsize,
    max_busy: AtomicUsize,
}

impl FakeSource {
    pub fn new(head: &str) -> Self {
        Self {
            head: Mutex::new(RevisionId::new(head)),
            resets: Mutex::new(Vec::new()),
            land_on: Mutex::new(None),
            pulls: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            busy: AtomicUsize::new(0),
            max_busy: AtomicUsize::new(0),
        }
    }

    /// Make every reset and pull take `latency`.
    pub fn slow_down(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Most resets and pulls ever seen running at once.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_busy.load(Ordering::SeqCst)
    }

    fn write_tree<T>(&self, op: impl FnOnce() -> T) -> T {
        let now = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_busy.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let out = op();
        self.busy.fetch_sub(1, Ordering::SeqCst);
        out
    }

    /// Make every reset land on `revision`.
    pub fn break_resets(&self, revision: &str) {
        *self.land_on.lock().unwrap() = Some(RevisionId::new(revision));
    }

    pub fn resets(&self) -> Vec<RevisionId> {
        self.resets.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl SourceControl for FakeSource {
    fn current_revision(&self) -> Result<RevisionId, SourceControlError> {
        Ok(self.head.lock().unwrap().clone())
    }

    fn reset_to(&self, revision: &RevisionId) -> Result<String, SourceControlError> {
        self.write_tree(|| {
            self.resets.lock().unwrap().push(revision.clone());
            let landed = self
                .land_on
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| revision.clone());
            *self.head.lock().unwrap() = landed.clone();
            Ok(format!("HEAD is now at {landed}"))
        })
    }

    fn pull(&self) -> Result<String, SourceControlError> {
        self.write_tree(|| {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            *self.head.lock().unwrap() = RevisionId::new(HEAD);
            Ok("Updating rev-good..rev-head".to_string())
        })
    }
}

/// Counts spawns instead of launching anything.
#[derive(Default)]
pub struct FakeSupervisor {
    spawns: AtomicUsize,
}

impl FakeSupervisor {
    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` spawns happened or a second passes.
    pub async fn wait_for_spawns(&self, n: usize) -> usize {
        for _ in 0..100 {
            if self.spawns() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.spawns()
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn spawn(&self, target: &SpawnTarget) -> Result<ProcessHandle, SpawnError> {
        let n = self.spawns.fetch_add(1, Ordering::SeqCst) as u32;
        Ok(ProcessHandle {
            pid: 1000 + n,
            log_path: target.log_dir.join(format!("{}-{n}.log", target.log_prefix)),
            started_at: chrono::Local::now(),
        })
    }
}

pub fn settings() -> RolloutSettings {
    RolloutSettings {
        token: Some("secret".to_string()),
        heartbeat: HeartbeatPolicy::new(Duration::from_millis(100)),
        handoff_timeout: Duration::from_millis(200),
        retire_previous: RetireMode::Coma,
        mode: Mode::Production,
        spawn_target: SpawnTarget {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: PathBuf::from("."),
            log_dir: PathBuf::from("log"),
            log_prefix: "worker".to_string(),
        },
    }
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub source: Arc<FakeSource>,
    pub supervisor: Arc<FakeSupervisor>,
    next_seq: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    /// Harness whose health gate requires `core` and 100%.
    pub fn with_settings(settings: RolloutSettings) -> Self {
        Self::build(settings, RespawnBackoff::default())
    }

    pub fn build(settings: RolloutSettings, backoff: RespawnBackoff) -> Self {
        Self::build_from(settings, backoff, Some(RevisionId::new(KNOWN_GOOD)))
    }

    /// Gateway that never recorded a known-good revision.
    pub fn without_known_good() -> Self {
        Self::build_from(settings(), RespawnBackoff::default(), None)
    }

    fn build_from(
        settings: RolloutSettings,
        backoff: RespawnBackoff,
        known_good: Option<RevisionId>,
    ) -> Self {
        let source = Arc::new(FakeSource::new(HEAD));
        let supervisor = Arc::new(FakeSupervisor::default());
        let controller = Controller::new(
            settings,
            HealthGate::new(["core"], 100.0),
            source.clone(),
            supervisor.clone(),
        )
        .with_last_known_good(known_good)
        .with_respawn_backoff(backoff);
        Self {
            controller: Arc::new(controller),
            source,
            supervisor,
            next_seq: 0,
        }
    }

    pub async fn connect(&mut self) -> Worker {
        self.next_seq += 1;
        let id = ConnectionId::from_seq(self.next_seq);
        let (tx, rx) = mpsc::unbounded_channel();
        self.controller.connect(id.clone(), tx).await;
        Worker {
            id,
            rx,
            controller: self.controller.clone(),
        }
    }

    /// Connect a worker and walk it to ACTIVE through a granted hello.
    pub async fn active_worker(&mut self, version: &str) -> Worker {
        let mut w = self.connect().await;
        assert!(w.hello(version).await, "expected hello to be granted");
        w.send(r#"{"t":"ready","d":{}}"#).await;
        assert_eq!(w.recv().await, GatewayEvent::Cmd(Command::Ok));
        w
    }

    /// Connect a worker that is READY but not granted.
    pub async fn candidate(&mut self, version: &str) -> Worker {
        let mut w = self.connect().await;
        assert!(!w.hello(version).await, "expected hello to be withheld");
        w.send(r#"{"t":"ready","d":{}}"#).await;
        w
    }
}

pub struct Worker {
    pub id: ConnectionId,
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
    controller: Arc<Controller>,
}

impl Worker {
    /// Decode `frame` and hand it to the controller as this worker.
    pub async fn send(&self, frame: &str) {
        let event = WorkerEvent::decode(frame).expect("test frame decodes");
        self.controller.handle(&self.id, event).await;
    }

    /// Hello with `version`; returns the granted `process_commands` flag.
    pub async fn hello(&mut self, version: &str) -> bool {
        self.send(&format!(r#"{{"t":"hello","d":{{"version":"{version}"}}}}"#))
            .await;
        match self.recv().await {
            GatewayEvent::Hello {
                process_commands, ..
            } => process_commands,
            other => panic!("expected hello ack, got {other:?}"),
        }
    }

    pub async fn recv(&mut self) -> GatewayEvent {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("frame within timeout")
            .expect("outbox open")
    }

    /// Next queued frame, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.rx.try_recv().ok()
    }

    /// True once the gateway dropped this worker's outbox and it drained.
    pub fn is_closed(&mut self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

pub fn health_frame(ok: bool, core: bool, percent: u32) -> String {
    format!(
        r#"{{"t":"health_check","d":{{"ok":{ok},"subsystems":{{"core":{core}}},"percent":{percent}}}}}"#
    )
}

pub fn shutdown_cmd(reason: &str) -> GatewayEvent {
    GatewayEvent::Cmd(Command::Shutdown {
        reason: reason.to_string(),
    })
}

pub fn state_in(
    snapshot: &baton_rollout::ControllerSnapshot,
    id: &ConnectionId,
) -> Option<baton_core::LifecycleState> {
    snapshot
        .workers
        .iter()
        .find(|w| &w.connection_id == id)
        .map(|w| w.state)
}
