//! Error types for registry operations.

use baton_core::{ConnectionId, LifecycleState};
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Recoverable bookkeeping errors. The offending event is ignored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown worker: {0}")]
    UnknownWorker(ConnectionId),

    #[error("invalid transition for {id}: {from} → {to}")]
    InvalidTransition {
        id: ConnectionId,
        from: LifecycleState,
        to: LifecycleState,
    },
}
