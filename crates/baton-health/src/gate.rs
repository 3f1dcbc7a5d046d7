//! Health gate: evaluates a candidate's self-reported health.

use std::fmt;

use tracing::{debug, warn};

use baton_core::HealthReport;
use baton_core::config::HealthGateConfig;

/// Why a candidate failed the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum FailReason {
    /// A vital subsystem reported down, or was missing from the report.
    VitalSubsystemFailure(String),
    /// The reported percentage was under `min_healthy_percent`.
    BelowThreshold(f64),
}

impl FailReason {
    /// Reason string sent to the worker in its `shutdown` command.
    pub fn shutdown_reason(&self) -> &'static str {
        match self {
            FailReason::VitalSubsystemFailure(_) => "vital_subsystem_failure",
            FailReason::BelowThreshold(_) => "health_check_failure",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::VitalSubsystemFailure(name) => {
                write!(f, "vital subsystem {name} failed to load")
            }
            FailReason::BelowThreshold(percent) => write!(f, "{percent}% is too low to start"),
        }
    }
}

/// Outcome of [`HealthGate::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(FailReason),
}

/// Promotion policy: which subsystems are vital and how healthy is enough.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthGate {
    /// Checked in order; the first failure wins.
    vital_subsystems: Vec<String>,
    min_healthy_percent: f64,
}

impl HealthGate {
    pub fn new(
        vital_subsystems: impl IntoIterator<Item = impl Into<String>>,
        min_healthy_percent: f64,
    ) -> Self {
        let mut vital: Vec<String> = Vec::new();
        for name in vital_subsystems {
            let name = name.into();
            if !vital.contains(&name) {
                vital.push(name);
            }
        }
        Self {
            vital_subsystems: vital,
            min_healthy_percent,
        }
    }

    pub fn from_config(config: &HealthGateConfig) -> Self {
        Self::new(config.vital_subsystems.iter().cloned(), config.min_healthy_percent)
    }

    pub fn vital_subsystems(&self) -> &[String] {
        &self.vital_subsystems
    }

    pub fn min_healthy_percent(&self) -> f64 {
        self.min_healthy_percent
    }

    /// Judge a report.
    ///
    /// `ok == true` passes without looking at anything else. Otherwise a
    /// vital subsystem that is down or absent fails the gate, then the
    /// percentage is compared against the threshold.
    pub fn evaluate(&self, report: &HealthReport) -> Verdict {
        if report.ok {
            debug!("health report self-certified ok");
            return Verdict::Pass;
        }

        for name in &self.vital_subsystems {
            let up = report.subsystems.get(name).copied().unwrap_or(false);
            if !up {
                warn!(subsystem = %name, "vital subsystem down");
                return Verdict::Fail(FailReason::VitalSubsystemFailure(name.clone()));
            }
        }

        if report.percent < self.min_healthy_percent {
            warn!(
                percent = report.percent,
                threshold = self.min_healthy_percent,
                "health below threshold"
            );
            return Verdict::Fail(FailReason::BelowThreshold(report.percent));
        }

        Verdict::Pass
    }
}
