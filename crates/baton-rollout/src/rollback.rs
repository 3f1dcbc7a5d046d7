//! Rollback manager: the sane flag and the last known-good revision.
//!
//! A rollback is split in three so the blocking `git reset` never runs
//! under the controller lock: [`RollbackManager::begin`] captures the
//! target, [`RollbackJob::run`] does the work, and
//! [`RollbackManager::finish`] applies the outcome.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use baton_core::RevisionId;
use baton_supervisor::{SourceControl, SourceControlError};

use crate::ALERT_TARGET;

/// A rollback that did not land the tree on the known-good revision.
///
/// Always fatal: the gateway stops acting on its own until an operator
/// clears the flag.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RollbackFailure {
    #[error("no known-good revision to roll back to")]
    NoKnownGood,

    #[error("source control failed: {0}")]
    SourceControl(String),

    #[error("tree is at {actual}, expected {expected}")]
    Mismatch {
        expected: RevisionId,
        actual: RevisionId,
        output: String,
    },
}

impl RollbackFailure {
    /// Raw tool output, for the alert.
    pub fn output(&self) -> &str {
        match self {
            RollbackFailure::NoKnownGood => "",
            RollbackFailure::SourceControl(output) => output,
            RollbackFailure::Mismatch { output, .. } => output,
        }
    }
}

impl From<SourceControlError> for RollbackFailure {
    fn from(e: SourceControlError) -> Self {
        match e {
            SourceControlError::Command { output, .. } => RollbackFailure::SourceControl(output),
            other => RollbackFailure::SourceControl(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollbackManager {
    last_known_good: Option<RevisionId>,
    sane: bool,
}

impl RollbackManager {
    pub fn new(initial: Option<RevisionId>) -> Self {
        Self {
            last_known_good: initial,
            sane: true,
        }
    }

    /// Remember the revision a passing worker was built from.
    pub fn record_good(&mut self, revision: RevisionId) {
        info!(%revision, "recorded known-good revision");
        self.last_known_good = Some(revision);
    }

    pub fn last_known_good(&self) -> Option<&RevisionId> {
        self.last_known_good.as_ref()
    }

    /// False after a failed rollback. Blocks rollouts and respawns.
    pub fn is_sane(&self) -> bool {
        self.sane
    }

    pub fn begin(&self, source: Arc<dyn SourceControl>) -> RollbackJob {
        RollbackJob {
            source,
            target: self.last_known_good.clone(),
        }
    }

    /// Apply a finished job. Any failure clears the sane flag.
    pub fn finish(&mut self, outcome: &Result<RevisionId, RollbackFailure>) {
        match outcome {
            Ok(revision) => info!(%revision, "rollback complete"),
            Err(failure) => {
                self.sane = false;
                error!(
                    target: ALERT_TARGET,
                    %failure,
                    output = failure.output(),
                    "rollback failed, automatic actions halted"
                );
            }
        }
    }

    /// Operator reset after a failed rollback.
    pub fn clear_sane(&mut self) {
        if !self.sane {
            info!("sane flag cleared by operator");
        }
        self.sane = true;
    }
}

/// The blocking half of a rollback.
pub struct RollbackJob {
    source: Arc<dyn SourceControl>,
    target: Option<RevisionId>,
}

impl RollbackJob {
    pub fn target(&self) -> Option<&RevisionId> {
        self.target.as_ref()
    }

    /// Reset the tree and confirm it landed on the target.
    pub fn run(self) -> Result<RevisionId, RollbackFailure> {
        let target = self.target.ok_or(RollbackFailure::NoKnownGood)?;
        info!(revision = %target, "rolling back source tree");

        let output = self.source.reset_to(&target)?;
        let actual = self.source.current_revision()?;
        if actual != target {
            return Err(RollbackFailure::Mismatch {
                expected: target,
                actual,
                output,
            });
        }
        Ok(target)
    }
}
