//! Phase runner: drives a single phase through one execution.
//!
//! The runner resolves nothing itself; it receives already-resolved inputs,
//! invokes the executor under a timeout, and validates that every declared
//! output is present in the result. Status transitions and artifact recording
//! stay with the orchestrator.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::PhaseFailure;
use crate::executor::{ExecutionRequest, Executor, FailureContext};
use crate::template::PhaseSpec;

/// Executes one phase and validates its outputs.
#[derive(Clone)]
pub struct PhaseRunner {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl PhaseRunner {
    pub fn new(executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Run the phase once. On success returns the artifacts to record, keyed
    /// by declared output name; extra undeclared artifacts are dropped with a
    /// warning.
    pub async fn run_phase(
        &self,
        spec: &PhaseSpec,
        inputs: BTreeMap<String, Value>,
        prior_failure: Option<FailureContext>,
    ) -> Result<BTreeMap<String, Value>, PhaseFailure> {
        let request = ExecutionRequest {
            phase_id: spec.id.clone(),
            agent_id: spec.agent.clone(),
            instruction: spec.instruction.clone(),
            inputs,
            prior_failure,
        };

        debug!(phase = %spec.id, agent = %spec.agent, timeout_s = self.timeout.as_secs(), "dispatching phase to executor");

        let output = match tokio::time::timeout(self.timeout, self.executor.execute(request)).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(failure)) => {
                return Err(PhaseFailure::Executor {
                    message: failure.message,
                });
            }
            Err(_) => {
                return Err(PhaseFailure::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        // The executor claimed success; every declared output must be there.
        let mut produced = BTreeMap::new();
        for name in &spec.outputs {
            match output.artifacts.get(name) {
                Some(value) => {
                    produced.insert(name.clone(), value.clone());
                }
                None => {
                    return Err(PhaseFailure::OutputValidation {
                        artifact: name.clone(),
                    });
                }
            }
        }

        for extra in output.artifacts.keys() {
            if !spec.outputs.contains(extra) {
                warn!(phase = %spec.id, artifact = %extra, "executor produced undeclared artifact, dropping");
            }
        }

        Ok(produced)
    }
}
