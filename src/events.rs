//! Observational run events.
//!
//! Consumers (CLI rendering, interaction logs) subscribe through an mpsc
//! channel; events never influence control flow. Serialized snake_case so a
//! log line is greppable by type.

use serde::{Deserialize, Serialize};

use crate::state::{PhaseOutcome, RunSummary};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A block is about to execute its first attempt.
    BlockStarted {
        block: usize,
        phases: Vec<String>,
    },
    /// A phase was dispatched to the executor.
    PhaseStarted {
        phase: String,
        block: usize,
        attempt: u32,
    },
    /// A phase finished (success or failure).
    PhaseCompleted {
        phase: String,
        outcome: Box<PhaseOutcome>,
    },
    /// An artifact produced earlier is being consumed by a dependent phase.
    ArtifactShared {
        producer: String,
        consumer: String,
        artifact: String,
    },
    /// A failed block is being retried after a backoff delay.
    BlockRetry {
        block: usize,
        attempt: u32,
        delay_ms: u64,
        failed_phases: Vec<String>,
    },
    /// A block completed successfully.
    BlockCompleted {
        block: usize,
        attempts: u32,
    },
    /// The run finished.
    RunCompleted {
        success: bool,
        summary: RunSummary,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = RunEvent::BlockRetry {
            block: 2,
            attempt: 1,
            delay_ms: 2000,
            failed_phases: vec!["build".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"block_retry\""));
        assert!(json.contains("2000"));
    }

    #[test]
    fn artifact_shared_round_trips() {
        let event = RunEvent::ArtifactShared {
            producer: "plan".into(),
            consumer: "build".into(),
            artifact: "plan.md".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        match back {
            RunEvent::ArtifactShared { producer, .. } => assert_eq!(producer, "plan"),
            other => panic!("Expected ArtifactShared, got {other:?}"),
        }
    }
}
