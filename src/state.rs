//! Run state tracking: phase lifecycle, per-phase outcomes, run summary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::errors::PhaseFailure;

/// Lifecycle of a phase within one run.
///
/// `Pending -> Ready -> Running -> {Succeeded, Failed}`; a block retry resets
/// every phase of the block back to `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting for dependencies
    #[default]
    Pending,
    /// All dependencies succeeded, eligible for dispatch
    Ready,
    /// Dispatched to the executor
    Running { started_at_ms: u64 },
    /// Terminal success
    Succeeded { attempts: u32 },
    /// Terminal failure for this attempt
    Failed { failure: PhaseFailure },
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn running_now() -> Self {
        Self::Running {
            started_at_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Result of one phase at the end of a run (or of the last attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: String,
    pub block: usize,
    pub success: bool,
    /// Executions of this phase across all block attempts
    pub attempts: u32,
    /// Artifact names recorded on success
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PhaseFailure>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl PhaseOutcome {
    pub fn success(
        phase: &str,
        block: usize,
        attempts: u32,
        artifacts: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            phase: phase.to_string(),
            block,
            success: true,
            attempts,
            artifacts,
            failure: None,
            duration,
        }
    }

    pub fn failure(
        phase: &str,
        block: usize,
        attempts: u32,
        failure: PhaseFailure,
        duration: Duration,
    ) -> Self {
        Self {
            phase: phase.to_string(),
            block,
            success: false,
            attempts,
            artifacts: Vec::new(),
            failure: Some(failure),
            duration,
        }
    }
}

/// Summary of one workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_phases: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_blocks: usize,
    pub blocks_completed: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub phase_outcomes: HashMap<String, PhaseOutcome>,
}

impl RunSummary {
    pub fn new(total_phases: usize, total_blocks: usize) -> Self {
        Self {
            total_phases,
            total_blocks,
            ..Default::default()
        }
    }

    /// Record a phase outcome, replacing any earlier attempt's entry.
    pub fn record(&mut self, outcome: PhaseOutcome) {
        if let Some(previous) = self.phase_outcomes.get(&outcome.phase) {
            if previous.success {
                self.succeeded -= 1;
            } else {
                self.failed -= 1;
            }
        }
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.phase_outcomes.insert(outcome.phase.clone(), outcome);
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total_phases
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
