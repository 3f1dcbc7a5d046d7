//! baton-health: the health gate applied before promotion.
//!
//! A candidate worker answers a `health_check` command with a
//! [`HealthReport`](baton_core::HealthReport). The [`HealthGate`] turns that
//! report into a [`Verdict`]; it holds only policy and no state, so the
//! controller can call it while holding its lock.

pub mod gate;

pub use gate::{FailReason, HealthGate, Verdict};
