//! baton-registry: who is connected, and who has gone quiet.
//!
//! # Architecture
//!
//! ```text
//! WorkerRegistry
//!   ├── register()   → CONNECTED record per channel
//!   ├── identify()   → CONNECTED → IDENTIFIED (+ version)
//!   ├── mark_ready() → IDENTIFIED → READY
//!   ├── transition() → guarded moves to ACTIVE/STANDBY/COMA/TERMINATED
//!   └── remove()     → idempotent
//!
//! HeartbeatPolicy
//!   ├── touch()          → refresh last-seen, report the gap
//!   └── silent_workers() → candidates for eviction
//! ```
//!
//! The registry is plain data with no locking; the rollout controller
//! owns it behind its single state lock.

pub mod error;
pub mod heartbeat;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use heartbeat::HeartbeatPolicy;
pub use registry::{WorkerRecord, WorkerRegistry};
