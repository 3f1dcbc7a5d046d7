//! Process supervisor: launches worker processes.
//!
//! Each spawn gets a fresh log file named after the spawn time; the
//! child's stdout and stderr both go there. Spawning never waits for the
//! child: a detached reaper thread collects its exit status and logs it.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use baton_core::config::{BatonConfig, WorkerConfig};

use crate::error::SpawnError;

/// What to launch, and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnTarget {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory (the worker's source tree).
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_prefix: String,
}

impl SpawnTarget {
    pub fn from_config(config: &BatonConfig) -> Self {
        let WorkerConfig {
            program,
            args,
            log_dir,
            log_prefix,
            ..
        } = &config.worker;
        Self {
            program: program.clone(),
            args: args.clone(),
            working_dir: config.source.path.clone(),
            log_dir: log_dir.clone(),
            log_prefix: log_prefix.clone(),
        }
    }

    /// Log file for a spawn at `at`: `<log_dir>/<prefix>-YYYY-mm-dd-HH-MM-SS.log`.
    pub fn log_path(&self, at: &DateTime<Local>) -> PathBuf {
        self.log_dir.join(format!(
            "{}-{}.log",
            self.log_prefix,
            at.format("%Y-%m-%d-%H-%M-%S")
        ))
    }
}

/// A launched worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub log_path: PathBuf,
    pub started_at: DateTime<Local>,
}

/// Launches worker processes.
///
/// Blocking; run it off the async executor.
pub trait ProcessSupervisor: Send + Sync {
    fn spawn(&self, target: &SpawnTarget) -> Result<ProcessHandle, SpawnError>;
}

/// [`ProcessSupervisor`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone)]
pub struct CommandSupervisor;

impl CommandSupervisor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSupervisor for CommandSupervisor {
    fn spawn(&self, target: &SpawnTarget) -> Result<ProcessHandle, SpawnError> {
        let started_at = Local::now();
        let log_path = target.log_path(&started_at);

        fs::create_dir_all(&target.log_dir).map_err(|source| SpawnError::LogFile {
            path: target.log_dir.clone(),
            source,
        })?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| SpawnError::LogFile {
                path: log_path.clone(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| SpawnError::LogFile {
            path: log_path.clone(),
            source,
        })?;

        debug!(
            program = %target.program,
            args = ?target.args,
            cwd = %target.working_dir.display(),
            "spawning worker"
        );

        let mut child = Command::new(&target.program)
            .args(&target.args)
            .current_dir(&target.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| SpawnError::Launch {
                program: target.program.clone(),
                source,
            })?;

        let pid = child.id();
        info!(pid, log = %log_path.display(), "worker process spawned");

        // Reap the child so it does not linger as a zombie.
        let reaper = std::thread::Builder::new()
            .name(format!("baton-reaper-{pid}"))
            .spawn(move || match child.wait() {
                Ok(status) => info!(pid, %status, "worker process exited"),
                Err(e) => warn!(pid, error = %e, "failed to wait on worker process"),
            });
        if let Err(e) = reaper {
            warn!(pid, error = %e, "failed to start reaper thread");
        }

        Ok(ProcessHandle {
            pid,
            log_path,
            started_at,
        })
    }
}
