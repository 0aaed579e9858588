//! The executor capability: the external collaborator that performs a
//! phase's actual work.
//!
//! The core depends only on the `Executor` trait. The shipped implementation,
//! `ProcessExecutor`, spawns an external agent command per phase, feeds it a
//! prompt on stdin and parses the produced artifacts from stdout. Tests use
//! scripted stubs instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::agents::AgentLibrary;

/// Failure detail of one phase from a previous block attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorPhaseFailure {
    pub phase: String,
    pub error: String,
}

/// Context describing why the previous block attempt failed, forwarded
/// opaquely to the executor so the agent can self-correct. The core never
/// interprets its content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureContext {
    /// The attempt that failed (1-based)
    pub attempt: u32,
    pub failures: Vec<PriorPhaseFailure>,
}

impl FailureContext {
    /// Render as prompt text for executors that speak plain text.
    pub fn to_prompt_text(&self) -> String {
        let mut text = format!(
            "Previous attempt {} failed. Correct the following before retrying:\n",
            self.attempt
        );
        for failure in &self.failures {
            text.push_str(&format!("- phase '{}': {}\n", failure.phase, failure.error));
        }
        text
    }
}

/// Everything an executor needs to perform one phase.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub phase_id: String,
    pub agent_id: String,
    /// Free-form instruction payload from the template
    pub instruction: String,
    /// Required artifact name -> value, resolved from the artifact store
    pub inputs: BTreeMap<String, Value>,
    /// Present on retried attempts
    pub prior_failure: Option<FailureContext>,
}

/// Successful executor result: the artifacts it produced by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub artifacts: BTreeMap<String, Value>,
}

/// The external work failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorFailure {
    pub message: String,
}

impl ExecutorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The capability that performs a phase's work. Implementations must be
/// idempotent per phase: a block retry re-executes phases from scratch.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorOutput, ExecutorFailure>;
}

/// Executor that shells out to an external agent command.
///
/// The prompt is written to stdin; stdout is expected to end with a JSON
/// object mapping artifact names to values (any preceding output is treated
/// as agent chatter and ignored).
pub struct ProcessExecutor {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    agents: Arc<AgentLibrary>,
}

impl ProcessExecutor {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        agents: Arc<AgentLibrary>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            agents,
        }
    }

    fn build_prompt(&self, request: &ExecutionRequest) -> String {
        let mut prompt = String::new();

        if let Some(def) = self.agents.get(&request.agent_id) {
            if !def.instructions.is_empty() {
                prompt.push_str(&def.instructions);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str(&format!(
            "## PHASE\n{} (agent: {})\n\n## INSTRUCTION\n{}\n",
            request.phase_id, request.agent_id, request.instruction
        ));

        if !request.inputs.is_empty() {
            prompt.push_str("\n## INPUTS\n");
            for (name, value) in &request.inputs {
                prompt.push_str(&format!("### {name}\n{value}\n"));
            }
        }

        if let Some(ref prior) = request.prior_failure {
            prompt.push_str("\n## PRIOR FAILURE\n");
            prompt.push_str(&prior.to_prompt_text());
        }

        prompt.push_str(
            "\nWhen complete, print a single JSON object mapping each declared output name to its value as the last line of output.\n",
        );
        prompt
    }

    /// The last line of stdout that parses as a JSON object wins.
    fn parse_artifacts(stdout: &str) -> Option<BTreeMap<String, Value>> {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<BTreeMap<String, Value>>(line.trim()).ok())
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorOutput, ExecutorFailure> {
        let prompt = self.build_prompt(&request);

        // The runner drops this future on timeout; the child must die with it
        // or it would keep mutating the working dir alongside the retry.
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutorFailure::new(format!("Failed to spawn agent command: {e}"))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ExecutorFailure::new(format!("Failed to write prompt: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| ExecutorFailure::new(format!("Failed to close stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutorFailure::new(format!("Agent command failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorFailure::new(format!(
                "Agent command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let artifacts = Self::parse_artifacts(&stdout).ok_or_else(|| {
            ExecutorFailure::new("Agent command produced no artifact JSON on stdout")
        })?;

        Ok(ExecutorOutput { artifacts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            phase_id: "build".into(),
            agent_id: "builder".into(),
            instruction: "Build the app".into(),
            inputs: BTreeMap::from([("plan.md".to_string(), json!("the plan"))]),
            prior_failure: Some(FailureContext {
                attempt: 1,
                failures: vec![PriorPhaseFailure {
                    phase: "build".into(),
                    error: "tests failed".into(),
                }],
            }),
        }
    }

    #[test]
    fn prompt_includes_instruction_inputs_and_prior_failure() {
        let exec = ProcessExecutor::new(
            "agent",
            vec![],
            ".",
            Arc::new(AgentLibrary::default()),
        );
        let prompt = exec.build_prompt(&request());
        assert!(prompt.contains("Build the app"));
        assert!(prompt.contains("plan.md"));
        assert!(prompt.contains("tests failed"));
        assert!(prompt.contains("Previous attempt 1 failed"));
    }

    #[test]
    fn parse_artifacts_takes_last_json_line() {
        let stdout = "thinking...\nnot json\n{\"app.py\": \"print(1)\"}\n";
        let artifacts = ProcessExecutor::parse_artifacts(stdout).unwrap();
        assert_eq!(artifacts.get("app.py"), Some(&json!("print(1)")));
    }

    #[test]
    fn parse_artifacts_none_when_no_json() {
        assert!(ProcessExecutor::parse_artifacts("just chatter\n").is_none());
    }

    #[tokio::test]
    async fn timed_out_agent_process_dies_with_its_future() {
        use crate::runner::PhaseRunner;
        use crate::template::PhaseSpec;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ProcessExecutor::new(
            "sh",
            vec!["-c".into(), "sleep 1 && echo done > marker".into()],
            dir.path(),
            Arc::new(AgentLibrary::default()),
        ));
        let runner = PhaseRunner::new(executor, Duration::from_millis(100));

        let spec = PhaseSpec::new("build", "builder", vec![]);
        let err = runner
            .run_phase(&spec, BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::PhaseFailure::Timeout { .. }));

        // Were the child still alive it would create the marker at the
        // one-second mark.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("marker").exists());
    }

    #[test]
    fn failure_context_prompt_text_lists_phases() {
        let ctx = FailureContext {
            attempt: 2,
            failures: vec![
                PriorPhaseFailure {
                    phase: "a".into(),
                    error: "x".into(),
                },
                PriorPhaseFailure {
                    phase: "b".into(),
                    error: "y".into(),
                },
            ],
        };
        let text = ctx.to_prompt_text();
        assert!(text.contains("phase 'a'"));
        assert!(text.contains("phase 'b'"));
    }
}
