//! Identifiers and lifecycle states shared across the gateway.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Identity of one worker channel, assigned by the gateway on connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the id for the `seq`-th connection accepted by this gateway.
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("conn-{seq:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Revision-control identifier (a commit hash for git).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build version advertised by a worker in its `hello`.
///
/// Workers speak semver, but bare integers (`"7"`) and two-part versions
/// (`"1.2"`) are accepted and padded with zeros so that monotonic build
/// numbers compare correctly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerVersion(semver::Version);

impl WorkerVersion {
    pub fn semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for WorkerVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('v');
        let padded = match s.split('.').count() {
            1 => format!("{s}.0.0"),
            2 => format!("{s}.0"),
            _ => s.to_string(),
        };
        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|e| ProtocolError::Malformed(format!("invalid version {s:?}: {e}")))
    }
}

impl fmt::Display for WorkerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for WorkerVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WorkerVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Integers are tolerated on the wire as well as strings.
        let raw = serde_json::Value::deserialize(deserializer)?;
        let text = match raw {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "version must be a string or number, got {other}"
                )));
            }
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a worker is in the rollout lifecycle.
///
/// ```text
/// Connected → Identified → Ready → Active ─┐
///                              └→ Standby ←┘ → Coma
///                      (any) → Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Channel open, no `hello` yet.
    Connected,
    /// Sent `hello` with its version.
    Identified,
    /// Finished local startup.
    Ready,
    /// The single worker processing live commands.
    Active,
    /// Ready but not processing; kept warm.
    Standby,
    /// Confirmed it stopped processing commands.
    Coma,
    /// Told to shut down, or reported it did.
    Terminated,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal lifecycle edge.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Connected, Identified)
                | (Identified, Ready)
                | (Ready, Active)
                | (Ready, Standby)
                | (Active, Standby)
                | (Standby, Coma)
        ) || (next == Terminated && self != Terminated)
    }

    /// Member of the ready set: finished startup and not terminated.
    pub fn is_ready_set(self) -> bool {
        matches!(
            self,
            LifecycleState::Ready | LifecycleState::Standby | LifecycleState::Coma
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Connected => "connected",
            LifecycleState::Identified => "identified",
            LifecycleState::Ready => "ready",
            LifecycleState::Active => "active",
            LifecycleState::Standby => "standby",
            LifecycleState::Coma => "coma",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_padding() {
        let v: WorkerVersion = "7".parse().unwrap();
        assert_eq!(v.to_string(), "7.0.0");
        let v: WorkerVersion = "v1.2".parse().unwrap();
        assert_eq!(v.to_string(), "1.2.0");
        assert!("not-a-version".parse::<WorkerVersion>().is_err());
    }

    #[test]
    fn version_ordering_is_semantic() {
        let a: WorkerVersion = "0.9.0".parse().unwrap();
        let b: WorkerVersion = "0.10.0".parse().unwrap();
        assert!(b > a);
        let pre: WorkerVersion = "1.0.0-rc.1".parse().unwrap();
        let rel: WorkerVersion = "1.0.0".parse().unwrap();
        assert!(rel > pre);
    }

    #[test]
    fn version_accepts_json_numbers() {
        let v: WorkerVersion = serde_json::from_str("3").unwrap();
        assert_eq!(v.to_string(), "3.0.0");
        assert!(serde_json::from_str::<WorkerVersion>("true").is_err());
    }

    #[test]
    fn lifecycle_edges() {
        use LifecycleState::*;
        assert!(Connected.can_transition_to(Identified));
        assert!(!Connected.can_transition_to(Ready));
        assert!(!Identified.can_transition_to(Active));
        assert!(Ready.can_transition_to(Standby));
        assert!(Active.can_transition_to(Standby));
        assert!(!Active.can_transition_to(Coma));
        assert!(Standby.can_transition_to(Coma));
        assert!(Coma.can_transition_to(Terminated));
        assert!(!Terminated.can_transition_to(Terminated));
    }

    #[test]
    fn connection_ids_are_ordered_by_seq() {
        assert!(ConnectionId::from_seq(2) > ConnectionId::from_seq(1));
        assert_eq!(ConnectionId::from_seq(255).as_str(), "conn-000000ff");
    }
}
