//! baton-rollout: the orchestration brain of the gateway.
//!
//! Consumes events from every worker channel and decides, one event at a
//! time, who is active. Promotion of a newer worker goes through the
//! health gate and a cache handoff; a failed health check rolls the
//! source tree back; a failed rollback halts all automatic action until
//! an operator sends `try_again`.
//!
//! # Components
//!
//! - `controller`: [`Controller`], event dispatch, promotion, eviction, respawn
//! - `state`: [`ControllerState`], the single lock-guarded state object
//! - `rollback`: [`RollbackManager`], sane flag + last known-good revision
//! - `handoff`: [`CacheSnapshot`] and pending handoff replies

pub mod controller;
pub mod handoff;
pub mod rollback;
pub mod state;

pub use controller::{Controller, RespawnDecision, RolloutSettings};
pub use handoff::{CacheSnapshot, HandoffError, HandoffTable};
pub use rollback::{RollbackFailure, RollbackJob, RollbackManager};
pub use state::{ControllerSnapshot, ControllerState, Outbox, WorkerSummary};

/// Tracing target for conditions a human must hear about.
pub const ALERT_TARGET: &str = "baton::alert";
