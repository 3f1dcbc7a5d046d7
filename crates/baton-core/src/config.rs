//! baton.toml configuration parser.
//!
//! Every field has a default, so an empty file is a valid config.
//! Durations are human strings (`"15s"`, `"500ms"`, `"2m"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    pub gateway: GatewayConfig,
    pub rollout: RolloutConfig,
    pub health: HealthGateConfig,
    pub source: SourceConfig,
    pub worker: WorkerConfig,
    pub respawn: RespawnConfig,
    pub deploy: DeployConfig,
}

/// Production runs rollbacks and respawns; development only logs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

/// How the outgoing active worker is retired when a candidate is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    /// Keep it connected as a warm standby.
    #[default]
    Coma,
    /// Tell it to exit.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub port: u16,
    pub mode: Mode,
    /// Heartbeat interval advertised to workers in the hello ack.
    pub heartbeat_interval: String,
    /// Silence longer than `heartbeat_interval × multiplier` evicts a worker.
    pub heartbeat_multiplier: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 8080,
            mode: Mode::Production,
            heartbeat_interval: "15s".to_string(),
            heartbeat_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// How long to wait for the outgoing worker's cache snapshot.
    pub handoff_timeout: String,
    pub retire_previous: RetireMode,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            handoff_timeout: "5s".to_string(),
            retire_previous: RetireMode::Coma,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthGateConfig {
    /// Subsystems whose failure is fatal, checked in this order.
    pub vital_subsystems: Vec<String>,
    pub min_healthy_percent: f64,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            vital_subsystems: Vec::new(),
            min_healthy_percent: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Working tree of the worker application.
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Credential handed to workers; `BATON_WORKER_TOKEN` overrides it.
    pub token: Option<String>,
    pub log_dir: PathBuf,
    pub log_prefix: String,
    /// Spawn one worker as soon as the gateway is listening.
    pub spawn_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["main.py".to_string()],
            token: None,
            log_dir: PathBuf::from("log"),
            log_prefix: "worker".to_string(),
            spawn_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnConfig {
    pub base_delay: String,
    pub max_delay: String,
    /// Respawns older than this no longer count towards the backoff.
    pub window: String,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            base_delay: "1s".to_string(),
            max_delay: "60s".to_string(),
            window: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub branch: String,
    /// Commit message prefix that triggers a deploy.
    pub marker: String,
    /// Pause between `git pull` and spawning the new worker.
    pub pull_settle: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            marker: "[DEPLOY]".to_string(),
            pull_settle: "2s".to_string(),
        }
    }
}

impl BatonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BatonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct = self.health.min_healthy_percent;
        if !(0.0..=100.0).contains(&pct) {
            return Err(ConfigError::Invalid(format!(
                "health.min_healthy_percent must be within 0..=100, got {pct}"
            )));
        }
        if self.gateway.heartbeat_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "gateway.heartbeat_multiplier must be at least 1".to_string(),
            ));
        }
        if self.worker.program.trim().is_empty() {
            return Err(ConfigError::Invalid("worker.program is empty".to_string()));
        }

        for (field, value) in [
            ("gateway.heartbeat_interval", &self.gateway.heartbeat_interval),
            ("rollout.handoff_timeout", &self.rollout.handoff_timeout),
            ("respawn.base_delay", &self.respawn.base_delay),
            ("respawn.max_delay", &self.respawn.max_delay),
            ("respawn.window", &self.respawn.window),
            ("deploy.pull_settle", &self.deploy.pull_settle),
        ] {
            if parse_duration(value).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{field}: cannot parse duration {value:?}"
                )));
            }
        }
        if self.heartbeat_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "gateway.heartbeat_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        parse_duration(&self.gateway.heartbeat_interval).unwrap_or(Duration::from_secs(15))
    }

    pub fn handoff_timeout(&self) -> Duration {
        parse_duration(&self.rollout.handoff_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn respawn_base_delay(&self) -> Duration {
        parse_duration(&self.respawn.base_delay).unwrap_or(Duration::from_secs(1))
    }

    pub fn respawn_max_delay(&self) -> Duration {
        parse_duration(&self.respawn.max_delay).unwrap_or(Duration::from_secs(60))
    }

    pub fn respawn_window(&self) -> Duration {
        parse_duration(&self.respawn.window).unwrap_or(Duration::from_secs(600))
    }

    pub fn pull_settle(&self) -> Duration {
        parse_duration(&self.deploy.pull_settle).unwrap_or(Duration::from_secs(2))
    }

    /// Git ref a webhook push must target to trigger a deploy.
    pub fn deploy_ref(&self) -> String {
        format!("refs/heads/{}", self.deploy.branch)
    }
}

/// Parse `"500ms"`, `"15s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600));
    }
    None
}
