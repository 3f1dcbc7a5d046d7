//! Error types for OS-facing operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceControlError {
    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with status {status:?}: {output}")]
    Command {
        command: String,
        status: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawn task failed: {0}")]
    Task(String),
}
