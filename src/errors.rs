//! Typed error hierarchy for the maestro orchestrator.
//!
//! Three top-level enums cover the three failure domains:
//! - `ValidationError`: graph construction failures, fatal before any phase runs
//! - `ArtifactError`: artifact store misuse (duplicate or missing records)
//! - `RunError`: failures surfaced by a workflow run after execution began

use thiserror::Error;

/// Errors raised while building a `WorkflowGraph` from phase specifications.
///
/// These are fatal: no phase executes once validation fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Duplicate phase id: {phase}")]
    DuplicatePhase { phase: String },

    #[error("Unknown dependency '{dependency}' in phase '{phase}': no phase with that id exists")]
    UnknownDependency { phase: String, dependency: String },

    #[error("Cycle detected in phase dependencies. Involved phases: {phases:?}")]
    CycleDetected { phases: Vec<String> },

    #[error("Phase '{phase}' requires input '{artifact}' but no ancestor phase produces it")]
    MissingProducer { phase: String, artifact: String },

    #[error("Artifact '{artifact}' is declared as an output by both '{first}' and '{second}'")]
    DuplicateArtifact {
        artifact: String,
        first: String,
        second: String,
    },
}

/// Errors from the artifact store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Artifact '{artifact}' already recorded for phase '{phase}'")]
    DuplicateRecord { phase: String, artifact: String },

    #[error("Phase '{phase}' did not produce artifact '{artifact}'")]
    Missing { phase: String, artifact: String },
}

/// Why a single phase execution failed.
///
/// `OutputValidation` is kept distinct from `Executor` so operators can tell
/// configuration-shape problems from transient execution problems; both are
/// recoverable at block granularity.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseFailure {
    #[error("Executor failed: {message}")]
    Executor { message: String },

    #[error("Phase timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Executor reported success but omitted declared output '{artifact}'")]
    OutputValidation { artifact: String },

    #[error("Input resolution failed: {message}")]
    InputResolution { message: String },
}

impl PhaseFailure {
    /// Short stable code for operator-facing output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Executor { .. } => "executor",
            Self::Timeout { .. } => "timeout",
            Self::OutputValidation { .. } => "output_validation",
            Self::InputResolution { .. } => "input_resolution",
        }
    }
}

/// Errors surfaced by `Orchestrator::run` once execution has begun.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Block {block} exhausted {attempts} retry attempts, last failure in phase '{phase}'")]
    RetryExhausted {
        block: usize,
        attempts: u32,
        phase: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
