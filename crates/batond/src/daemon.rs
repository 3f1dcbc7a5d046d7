//! Startup plumbing: effective config and the controller it describes.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use baton_core::BatonConfig;
use baton_rollout::Controller;
use baton_supervisor::{ProcessSupervisor, SourceControl};

/// Overrides `worker.token` so the secret can stay out of baton.toml.
pub const TOKEN_ENV: &str = "BATON_WORKER_TOKEN";

/// Load `path` (or defaults) and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BatonConfig> {
    let mut config = match path {
        Some(path) => BatonConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            info!("no config file given, using defaults");
            BatonConfig::default()
        }
    };
    apply_token_override(&mut config, std::env::var(TOKEN_ENV).ok());
    config.validate()?;
    Ok(config)
}

pub fn apply_token_override(config: &mut BatonConfig, token: Option<String>) {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        config.worker.token = Some(token);
    }
}

/// Build the controller, seeding the rollback target with the revision
/// checked out right now.
pub async fn build_controller(
    config: &BatonConfig,
    source: Arc<dyn SourceControl>,
    supervisor: Arc<dyn ProcessSupervisor>,
) -> Arc<Controller> {
    let probe = Arc::clone(&source);
    let initial = match tokio::task::spawn_blocking(move || probe.current_revision()).await {
        Ok(Ok(revision)) => {
            info!(%revision, "starting revision recorded as known-good");
            Some(revision)
        }
        Ok(Err(e)) => {
            warn!(
                error = %e,
                "could not read starting revision, rollback unavailable until a worker passes"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "revision probe failed");
            None
        }
    };

    Arc::new(Controller::from_config(config, source, supervisor).with_last_known_good(initial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use baton_core::RevisionId;
    use baton_supervisor::{ProcessHandle, SourceControlError, SpawnError, SpawnTarget};

    struct FixedSource(Option<&'static str>);

    impl SourceControl for FixedSource {
        fn current_revision(&self) -> Result<RevisionId, SourceControlError> {
            match self.0 {
                Some(rev) => Ok(RevisionId::new(rev)),
                None => Err(SourceControlError::Command {
                    command: "git rev-parse HEAD".into(),
                    status: Some(128),
                    output: "fatal: not a git repository".into(),
                }),
            }
        }

        fn reset_to(&self, _: &RevisionId) -> Result<String, SourceControlError> {
            Ok(String::new())
        }

        fn pull(&self) -> Result<String, SourceControlError> {
            Ok(String::new())
        }
    }

    struct NoSpawn;

    impl ProcessSupervisor for NoSpawn {
        fn spawn(&self, target: &SpawnTarget) -> Result<ProcessHandle, SpawnError> {
            Err(SpawnError::Task(format!("{} not launched in tests", target.program)))
        }
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\nport = 9100\nmode = \"development\"\n\n[worker]\ntoken = \"from-file\""
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.gateway.mode, baton_core::config::Mode::Development);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn token_override_wins_over_file() {
        let mut config = BatonConfig::default();
        config.worker.token = Some("from-file".into());

        apply_token_override(&mut config, Some("  ".into()));
        assert_eq!(config.worker.token.as_deref(), Some("from-file"));

        apply_token_override(&mut config, Some("from-env".into()));
        assert_eq!(config.worker.token.as_deref(), Some("from-env"));
    }

    #[tokio::test]
    async fn starting_revision_seeds_known_good() {
        let controller = build_controller(
            &BatonConfig::default(),
            Arc::new(FixedSource(Some("abc123"))),
            Arc::new(NoSpawn),
        )
        .await;
        let snap = controller.snapshot().await;
        assert_eq!(snap.last_known_good, Some(RevisionId::new("abc123")));
        assert!(snap.sane);
    }

    #[tokio::test]
    async fn unreadable_tree_starts_without_known_good() {
        let controller = build_controller(
            &BatonConfig::default(),
            Arc::new(FixedSource(None)),
            Arc::new(NoSpawn),
        )
        .await;
        assert_eq!(controller.snapshot().await.last_known_good, None);
        assert!(controller.spawn_worker().await.is_err());
    }
}
