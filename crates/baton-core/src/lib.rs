//! baton-core: shared vocabulary for the Baton rollout gateway.
//!
//! Holds the identifiers and lifecycle states every other crate talks
//! about, the JSON wire protocol spoken over worker channels, and the
//! `baton.toml` configuration model.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::BatonConfig;
pub use error::{ConfigError, ProtocolError};
pub use protocol::{Command, GatewayEvent, HealthReport, WorkerEvent};
pub use types::*;
