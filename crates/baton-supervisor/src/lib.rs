//! baton-supervisor: the gateway's hands on the operating system.
//!
//! The OS-facing capabilities sit behind traits so the rollout logic can
//! be exercised against fakes:
//!
//! - `source`: [`SourceControl`], read the current revision, hard-reset
//!   to a revision, pull. [`GitCli`] shells out to `git`.
//! - `process`: [`ProcessSupervisor`], launch a worker with its output
//!   captured in a timestamped log file. [`CommandSupervisor`] uses
//!   `std::process`.
//! - `backoff`: [`RespawnBackoff`] spaces out automatic respawns of a
//!   crash-looping worker.
//!
//! The trait methods are blocking; callers run them on the blocking pool.

pub mod backoff;
pub mod error;
pub mod process;
pub mod source;

pub use backoff::RespawnBackoff;
pub use error::{SourceControlError, SpawnError};
pub use process::{CommandSupervisor, ProcessHandle, ProcessSupervisor, SpawnTarget};
pub use source::{GitCli, SourceControl};
