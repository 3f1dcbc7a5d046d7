//! Shared fixtures: a router over a controller wired to counting fakes.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;

use baton_api::{DeployFilter, GatewayState, build_router};
use baton_core::RevisionId;
use baton_core::config::{Mode, RetireMode};
use baton_health::HealthGate;
use baton_registry::HeartbeatPolicy;
use baton_rollout::{Controller, RolloutSettings};
use baton_supervisor::{
    ProcessHandle, ProcessSupervisor, SourceControl, SourceControlError, SpawnError, SpawnTarget,
};

#[derive(Default)]
pub struct CountingSource {
    pub pulls: AtomicUsize,
}

impl SourceControl for CountingSource {
    fn current_revision(&self) -> Result<RevisionId, SourceControlError> {
        Ok(RevisionId::new("abc123"))
    }

    fn reset_to(&self, revision: &RevisionId) -> Result<String, SourceControlError> {
        Ok(format!("HEAD is now at {revision}"))
    }

    fn pull(&self) -> Result<String, SourceControlError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok("Updating 1234..5678\n".to_string())
    }
}

#[derive(Default)]
pub struct CountingSupervisor {
    pub spawns: AtomicUsize,
    pub broken: AtomicBool,
}

impl ProcessSupervisor for CountingSupervisor {
    fn spawn(&self, target: &SpawnTarget) -> Result<ProcessHandle, SpawnError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(SpawnError::Launch {
                program: target.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessHandle {
            pid: 4242,
            log_path: target.log_dir.join("worker-test.log"),
            started_at: chrono::Local::now(),
        })
    }
}

pub struct Fixture {
    pub router: Router,
    pub controller: Arc<Controller>,
    pub source: Arc<CountingSource>,
    pub supervisor: Arc<CountingSupervisor>,
}

pub fn fixture() -> Fixture {
    let source = Arc::new(CountingSource::default());
    let supervisor = Arc::new(CountingSupervisor::default());
    let settings = RolloutSettings {
        token: None,
        heartbeat: HeartbeatPolicy::new(Duration::from_secs(15)),
        handoff_timeout: Duration::from_millis(100),
        retire_previous: RetireMode::Coma,
        mode: Mode::Production,
        spawn_target: SpawnTarget {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: PathBuf::from("."),
            log_dir: PathBuf::from("log"),
            log_prefix: "worker".to_string(),
        },
    };
    let controller = Arc::new(
        Controller::new(
            settings,
            HealthGate::new(Vec::<String>::new(), 100.0),
            source.clone(),
            supervisor.clone(),
        )
        .with_last_known_good(Some(RevisionId::new("abc123"))),
    );
    let deploy = DeployFilter {
        git_ref: "refs/heads/main".to_string(),
        marker: "[DEPLOY]".to_string(),
        pull_settle: Duration::ZERO,
    };
    Fixture {
        router: build_router(GatewayState::new(controller.clone(), deploy)),
        controller,
        source,
        supervisor,
    }
}

/// Poll until `counter` reaches `n` or a second passes.
pub async fn wait_for(counter: &AtomicUsize, n: usize) -> usize {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= n {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    counter.load(Ordering::SeqCst)
}
