//! Wire protocol spoken over worker channels.
//!
//! Every frame is a JSON object `{ "t": <event>, "d": <data> }`. Inbound
//! frames are decoded through an explicit dispatch table into the closed
//! [`WorkerEvent`] enum; anything it does not name is rejected as
//! malformed. Outbound frames are [`GatewayEvent`]s, with imperative
//! commands nested under `t = "cmd"` as [`Command`]s.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::WorkerVersion;

/// Self-reported health of a candidate worker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worker's own verdict. `true` skips every other check.
    #[serde(alias = "OK", default)]
    pub ok: bool,
    /// Per-subsystem load results.
    #[serde(alias = "cogs", default)]
    pub subsystems: BTreeMap<String, bool>,
    /// Percentage of subsystems that came up (0-100). Missing counts as 0.
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl HealthReport {
    /// A report that passes on its own `ok` flag.
    pub fn healthy() -> Self {
        Self {
            ok: true,
            subsystems: BTreeMap::new(),
            percent: 100.0,
            reason: None,
        }
    }
}

/// Events a worker (or an operator) sends to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// First contact, carrying the worker's build version.
    Hello { version: WorkerVersion },
    /// Liveness ping.
    Heartbeat,
    /// Local startup finished.
    Ready,
    /// Answer to a `health_check` command.
    HealthCheck(HealthReport),
    /// Worker confirms it stopped processing commands.
    Coma { reason: Option<String> },
    /// Worker confirms it is shutting down.
    Shutdown { reason: Option<String> },
    /// Cache snapshot: a handoff reply or a peer broadcast.
    CacheSync { cache: Option<Value> },
    /// Operator escalation: clear the sane flag and respawn.
    TryAgain,
}

#[derive(Deserialize)]
struct Envelope {
    t: String,
    #[serde(default)]
    d: Value,
}

#[derive(Deserialize)]
struct HelloPayload {
    version: WorkerVersion,
}

#[derive(Deserialize)]
struct ReasonPayload {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct CachePayload {
    #[serde(default)]
    cache: Option<Value>,
}

impl WorkerEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Malformed(format!("invalid envelope: {e}")))?;

        let event = match envelope.t.as_str() {
            "hello" | "identify" => {
                let p: HelloPayload = payload(&envelope.t, envelope.d)?;
                WorkerEvent::Hello { version: p.version }
            }
            "heartbeat" => WorkerEvent::Heartbeat,
            "ready" => WorkerEvent::Ready,
            "health_check" => WorkerEvent::HealthCheck(payload(&envelope.t, envelope.d)?),
            "coma" => {
                let p: ReasonPayload = payload(&envelope.t, envelope.d)?;
                WorkerEvent::Coma { reason: p.reason }
            }
            "shutdown" => {
                let p: ReasonPayload = payload(&envelope.t, envelope.d)?;
                WorkerEvent::Shutdown { reason: p.reason }
            }
            "cache_sync" => {
                let p: CachePayload = payload(&envelope.t, envelope.d)?;
                WorkerEvent::CacheSync { cache: p.cache }
            }
            "try_again" => WorkerEvent::TryAgain,
            other => {
                return Err(ProtocolError::Malformed(format!("unknown event {other:?}")));
            }
        };

        Ok(event)
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Hello { .. } => "hello",
            WorkerEvent::Heartbeat => "heartbeat",
            WorkerEvent::Ready => "ready",
            WorkerEvent::HealthCheck(_) => "health_check",
            WorkerEvent::Coma { .. } => "coma",
            WorkerEvent::Shutdown { .. } => "shutdown",
            WorkerEvent::CacheSync { .. } => "cache_sync",
            WorkerEvent::TryAgain => "try_again",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, d: Value) -> Result<T, ProtocolError> {
    // A missing `d` is the same as an empty object.
    let d = if d.is_null() {
        Value::Object(Default::default())
    } else {
        d
    };
    serde_json::from_value(d)
        .map_err(|e| ProtocolError::Malformed(format!("bad {event} payload: {e}")))
}

/// Events the gateway sends to a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Registration ack. `process_commands` grants or withholds live traffic.
    Hello {
        /// Heartbeat interval the worker should keep, in milliseconds.
        interval: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        process_commands: bool,
    },
    HeartbeatAck {
        /// Milliseconds since the previous beat from this worker.
        since_last_beat: u64,
    },
    Cmd(Command),
    /// `cache: None` asks the worker for its snapshot; otherwise a peer update.
    CacheSync { cache: Option<Value> },
}

impl GatewayEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Imperative commands, carried inside [`GatewayEvent::Cmd`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum Command {
    /// Acknowledge a provisional active worker's `ready`.
    Ok,
    /// Ask a candidate for a health report.
    HealthCheck {},
    /// Start (`stop: false`) or stop processing live commands.
    ProcessCommands {
        stop: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Graceful demotion.
    Coma { reason: String },
    /// Terminate.
    Shutdown { reason: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ok => "ok",
            Command::HealthCheck {} => "health_check",
            Command::ProcessCommands { .. } => "process_commands",
            Command::Coma { .. } => "coma",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}
