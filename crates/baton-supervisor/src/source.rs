//! Source control: the revision-control capability behind rollback and deploy.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use baton_core::RevisionId;

use crate::error::SourceControlError;

/// Narrow view of the worker's source tree.
///
/// Methods block; run them off the async executor.
pub trait SourceControl: Send + Sync {
    /// Revision currently checked out.
    fn current_revision(&self) -> Result<RevisionId, SourceControlError>;

    /// Destructively reset the working tree to `revision`, discarding any
    /// uncommitted changes. Returns the tool's raw output.
    fn reset_to(&self, revision: &RevisionId) -> Result<String, SourceControlError>;

    /// Fetch and merge the tracked branch. Returns the tool's raw output.
    fn pull(&self) -> Result<String, SourceControlError>;
}

/// [`SourceControl`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
    git: String,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            git: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_binary(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    fn run(&self, args: &[&str]) -> Result<String, SourceControlError> {
        let command = format!("{} {}", self.git, args.join(" "));
        debug!(repo = %self.repo.display(), %command, "running");

        let output = Command::new(&self.git)
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|source| SourceControlError::Io {
                command: command.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(SourceControlError::Command {
                command,
                status: output.status.code(),
                output: text,
            });
        }
        Ok(text)
    }
}

impl SourceControl for GitCli {
    fn current_revision(&self) -> Result<RevisionId, SourceControlError> {
        self.run(&["rev-parse", "HEAD"]).map(RevisionId::new)
    }

    fn reset_to(&self, revision: &RevisionId) -> Result<String, SourceControlError> {
        self.run(&["reset", "--hard", revision.as_str()])
    }

    fn pull(&self) -> Result<String, SourceControlError> {
        self.run(&["pull"])
    }
}
