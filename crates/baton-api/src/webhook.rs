//! Deploy webhook: a push to the deploy branch with a marked commit
//! pulls the source tree and launches a worker built from it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use baton_core::BatonConfig;
use baton_rollout::{ALERT_TARGET, Controller};

use crate::GatewayState;

/// Which pushes trigger a deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployFilter {
    /// Full ref, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// Commit-message prefix that requests a deploy.
    pub marker: String,
    /// Pause between the pull and the spawn.
    pub pull_settle: Duration,
}

impl DeployFilter {
    pub fn from_config(config: &BatonConfig) -> Self {
        Self {
            git_ref: config.deploy_ref(),
            marker: config.deploy.marker.clone(),
            pull_settle: config.pull_settle(),
        }
    }

    pub fn matches(&self, push: &PushEvent) -> bool {
        push.git_ref == self.git_ref
            && push
                .commits
                .iter()
                .any(|c| c.message.starts_with(&self.marker))
    }
}

/// The subset of a push event the gateway reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub message: String,
}

/// POST /payload
///
/// Always answers `200 OK`; the deploy itself runs in the background.
pub async fn payload(State(state): State<GatewayState>, body: Bytes) -> &'static str {
    match serde_json::from_slice::<PushEvent>(&body) {
        Ok(push) if state.deploy.matches(&push) => {
            info!(git_ref = %push.git_ref, commits = push.commits.len(), "deploy requested");
            tokio::spawn(deploy(
                Arc::clone(&state.controller),
                state.deploy.pull_settle,
            ));
        }
        Ok(push) => debug!(git_ref = %push.git_ref, "push ignored"),
        Err(e) => warn!(error = %e, "unparseable webhook body"),
    }
    "OK"
}

async fn deploy(controller: Arc<Controller>, settle: Duration) {
    match controller.pull_source().await {
        Ok(output) => info!(output = %output.trim(), "source pulled"),
        Err(e) => {
            error!(target: ALERT_TARGET, error = %e, "pull failed, deploy abandoned");
            return;
        }
    }
    tokio::time::sleep(settle).await;
    if controller.spawn_worker().await.is_err() {
        debug!("deploy spawn left for the next push");
    }
}
