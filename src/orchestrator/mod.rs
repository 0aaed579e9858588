//! Top-level workflow driver.
//!
//! The orchestrator walks the block plan in dependency order, hands each
//! block to the retry coordinator, and is the only component that mutates
//! phase status and the artifact store. Phases inside a block run
//! concurrently, bounded by a semaphore; block N+1 never starts until block N
//! has fully succeeded. A failed block that exhausts its retries fails the
//! run; later blocks are never attempted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::config::Config;
use crate::errors::{PhaseFailure, RunError};
use crate::events::RunEvent;
use crate::executor::{Executor, FailureContext};
use crate::graph::{PhaseIndex, WorkflowGraph};
use crate::planner::{Block, BlockPlanner};
use crate::retry::{PhaseFailureDetail, RetryCoordinator};
use crate::runner::PhaseRunner;
use crate::state::{ExecutionTimer, PhaseOutcome, PhaseStatus, RunSummary};

/// Final result of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    /// Index of the block whose retries were exhausted, when not successful
    pub failed_block: Option<usize>,
    pub summary: RunSummary,
    /// Final lifecycle state of every phase, keyed by phase id. Phases in
    /// blocks after the failed one remain `Pending`.
    pub phase_statuses: HashMap<String, PhaseStatus>,
    /// Every artifact recorded by the run, in stable order
    pub artifacts: Vec<ArtifactRef>,
}

impl RunResult {
    /// The typed error for a failed run, for operator-facing reporting.
    pub fn run_error(&self) -> Option<RunError> {
        let block = self.failed_block?;
        let failed = self
            .summary
            .phase_outcomes
            .values()
            .filter(|o| !o.success && o.block == block)
            .min_by(|a, b| a.phase.cmp(&b.phase))?;
        Some(RunError::RetryExhausted {
            block,
            attempts: failed.attempts,
            phase: failed.phase.clone(),
        })
    }

    /// Phases that never started because an earlier block failed.
    pub fn pending_phases(&self) -> Vec<&str> {
        let mut pending: Vec<&str> = self
            .phase_statuses
            .iter()
            .filter(|(_, status)| status.is_pending())
            .map(|(id, _)| id.as_str())
            .collect();
        pending.sort();
        pending
    }
}

/// Mutable state of one run: phase statuses, per-phase execution counts and
/// the artifact store. Owned by a single `run` invocation; there is no
/// cross-run shared state.
struct RunContext {
    graph: Arc<WorkflowGraph>,
    statuses: Vec<PhaseStatus>,
    executions: Vec<u32>,
    artifacts: ArtifactStore,
    summary: RunSummary,
}

impl RunContext {
    fn new(graph: Arc<WorkflowGraph>, total_blocks: usize) -> Self {
        let phases = graph.len();
        Self {
            graph,
            statuses: vec![PhaseStatus::Pending; phases],
            executions: vec![0; phases],
            artifacts: ArtifactStore::new(),
            summary: RunSummary::new(phases, total_blocks),
        }
    }
}

/// Drives a workflow graph to completion against an executor.
pub struct Orchestrator {
    config: Config,
    executor: Arc<dyn Executor>,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(config: Config, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            executor,
            event_tx: None,
        }
    }

    /// Set the observational event channel.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Execute the whole workflow. The graph is already validated; this
    /// method only fails on internal errors, never on validation.
    #[instrument(skip_all, fields(phases = graph.len()))]
    pub async fn run(&self, graph: WorkflowGraph) -> anyhow::Result<RunResult> {
        let timer = ExecutionTimer::start();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let graph = Arc::new(graph);
        let plan = BlockPlanner::plan(&graph);

        info!(run_id = %run_id, blocks = plan.len(), "starting workflow run");
        if self.config.verbose {
            for line in plan.describe(&graph) {
                info!("{line}");
            }
        }

        let ctx = Arc::new(Mutex::new(RunContext::new(graph.clone(), plan.len())));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let runner = PhaseRunner::new(self.executor.clone(), self.config.phase_timeout);

        let mut coordinator = RetryCoordinator::new(self.config.max_retries, self.config.backoff);
        if let Some(ref tx) = self.event_tx {
            coordinator = coordinator.with_event_channel(tx.clone());
        }

        let mut failed_block: Option<usize> = None;

        for block in plan.blocks() {
            let phase_ids: Vec<String> = block
                .phases
                .iter()
                .map(|&i| graph.id_of(i).to_string())
                .collect();

            self.emit(RunEvent::BlockStarted {
                block: block.index,
                phases: phase_ids,
            })
            .await;

            let result = coordinator
                .run_block(block.index, |attempt, prior| {
                    execute_block_attempt(
                        ctx.clone(),
                        block.clone(),
                        attempt,
                        prior,
                        runner.clone(),
                        semaphore.clone(),
                        self.event_tx.clone(),
                    )
                })
                .await;

            if result.success {
                {
                    let mut ctx = ctx.lock().await;
                    ctx.summary.blocks_completed += 1;
                }
                self.emit(RunEvent::BlockCompleted {
                    block: block.index,
                    attempts: result.attempts_used,
                })
                .await;
            } else {
                warn!(
                    block = block.index,
                    attempts = result.attempts_used,
                    "block failed after exhausting retries, aborting run"
                );
                failed_block = Some(block.index);
                break;
            }
        }

        let ctx = Arc::try_unwrap(ctx)
            .map_err(|_| anyhow::anyhow!("run context still shared after execution"))?
            .into_inner();

        let phase_statuses: HashMap<String, PhaseStatus> = ctx
            .statuses
            .iter()
            .enumerate()
            .map(|(i, status)| (ctx.graph.id_of(i).to_string(), status.clone()))
            .collect();

        let mut summary = ctx.summary;
        summary.duration = timer.elapsed();
        let success = failed_block.is_none() && summary.all_success();

        let result = RunResult {
            run_id,
            started_at,
            success,
            failed_block,
            summary,
            phase_statuses,
            artifacts: ctx.artifacts.all_refs(),
        };

        self.emit(RunEvent::RunCompleted {
            success,
            summary: result.summary.clone(),
        })
        .await;

        info!(success, duration_ms = result.summary.duration.as_millis() as u64, "workflow run finished");
        Ok(result)
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

/// Execute one attempt of a block: reset member phases, dispatch them
/// concurrently, collect every outcome. Siblings of a failed phase run to
/// completion; in-flight executor calls are never interrupted.
async fn execute_block_attempt(
    ctx: Arc<Mutex<RunContext>>,
    block: Block,
    attempt: u32,
    prior: Option<FailureContext>,
    runner: PhaseRunner,
    semaphore: Arc<Semaphore>,
    event_tx: Option<mpsc::Sender<RunEvent>>,
) -> Vec<PhaseFailureDetail> {
    let mut failures: Vec<PhaseFailureDetail> = Vec::new();
    let mut dispatched = 0usize;
    let (result_tx, mut result_rx) =
        mpsc::channel::<(PhaseIndex, Result<BTreeMap<String, serde_json::Value>, PhaseFailure>, Duration)>(
            block.len().max(1),
        );

    {
        let mut ctx = ctx.lock().await;

        // Reset for retry: every member returns to Pending and its previous
        // outputs are dropped, succeeded siblings included.
        if attempt > 1 {
            for &idx in &block.phases {
                let id = ctx.graph.id_of(idx).to_string();
                ctx.artifacts.clear_phase(&id);
                ctx.statuses[idx] = PhaseStatus::Pending;
            }
        }

        // All external dependencies live in earlier, fully-succeeded blocks.
        let completed: HashSet<usize> = ctx
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| status.is_success())
            .map(|(i, _)| i)
            .collect();
        for &idx in &block.phases {
            debug_assert!(ctx.graph.dependencies_satisfied(idx, &completed));
            ctx.statuses[idx] = PhaseStatus::Ready;
        }
    }

    for &idx in &block.phases {
        let (spec, inputs) = {
            let mut ctx = ctx.lock().await;
            let spec = ctx.graph.spec(idx).clone();

            let inputs = match ctx.artifacts.resolve_inputs(&ctx.graph, idx) {
                Ok(inputs) => inputs,
                Err(e) => {
                    // Defensive: validation guarantees a producer, and earlier
                    // blocks are fully succeeded. A miss here is a bug.
                    let failure = PhaseFailure::InputResolution {
                        message: e.to_string(),
                    };
                    ctx.executions[idx] += 1;
                    let executions = ctx.executions[idx];
                    ctx.statuses[idx] = PhaseStatus::Failed {
                        failure: failure.clone(),
                    };
                    let outcome = PhaseOutcome::failure(
                        &spec.id,
                        block.index,
                        executions,
                        failure.clone(),
                        Duration::ZERO,
                    );
                    ctx.summary.record(outcome);
                    failures.push(PhaseFailureDetail {
                        phase: spec.id.clone(),
                        failure,
                    });
                    continue;
                }
            };

            // Interaction log: who consumes whose artifact.
            if let Some(ref tx) = event_tx {
                for name in inputs.keys() {
                    if let Some(producer) = ctx.graph.producer_of(name) {
                        let producer = ctx.graph.id_of(producer).to_string();
                        tx.send(RunEvent::ArtifactShared {
                            producer,
                            consumer: spec.id.clone(),
                            artifact: name.clone(),
                        })
                        .await
                        .ok();
                    }
                }
            }

            ctx.executions[idx] += 1;
            ctx.statuses[idx] = PhaseStatus::running_now();
            (spec, inputs)
        };

        if let Some(ref tx) = event_tx {
            tx.send(RunEvent::PhaseStarted {
                phase: spec.id.clone(),
                block: block.index,
                attempt,
            })
            .await
            .ok();
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // semaphore closed, run is being torn down
        };
        let runner = runner.clone();
        let result_tx = result_tx.clone();
        let prior = prior.clone();

        tokio::spawn(async move {
            let _permit = permit; // held for the whole phase
            let timer = ExecutionTimer::start();
            let result = runner.run_phase(&spec, inputs, prior).await;
            result_tx.send((idx, result, timer.elapsed())).await.ok();
        });
        dispatched += 1;
    }
    drop(result_tx);

    // Collect every dispatched phase; no cancellation of in-flight siblings.
    for _ in 0..dispatched {
        let Some((idx, result, duration)) = result_rx.recv().await else {
            break;
        };

        let mut ctx = ctx.lock().await;
        let phase_id = ctx.graph.id_of(idx).to_string();
        let executions = ctx.executions[idx];

        match result {
            Ok(produced) => {
                let names: Vec<String> = produced.keys().cloned().collect();
                let mut record_failure = None;
                for (name, value) in produced {
                    if let Err(e) = ctx.artifacts.record(&phase_id, &name, value) {
                        record_failure = Some(PhaseFailure::Executor {
                            message: e.to_string(),
                        });
                        break;
                    }
                }

                if let Some(failure) = record_failure {
                    ctx.statuses[idx] = PhaseStatus::Failed {
                        failure: failure.clone(),
                    };
                    let outcome = PhaseOutcome::failure(
                        &phase_id,
                        block.index,
                        executions,
                        failure.clone(),
                        duration,
                    );
                    ctx.summary.record(outcome.clone());
                    failures.push(PhaseFailureDetail {
                        phase: phase_id,
                        failure,
                    });
                    if let Some(ref tx) = event_tx {
                        tx.send(RunEvent::PhaseCompleted {
                            phase: outcome.phase.clone(),
                            outcome: Box::new(outcome),
                        })
                        .await
                        .ok();
                    }
                    continue;
                }

                ctx.statuses[idx] = PhaseStatus::Succeeded {
                    attempts: executions,
                };
                let outcome =
                    PhaseOutcome::success(&phase_id, block.index, executions, names, duration);
                info!(phase = %phase_id, attempts = executions, duration_ms = duration.as_millis() as u64, "phase succeeded");
                ctx.summary.record(outcome.clone());
                if let Some(ref tx) = event_tx {
                    tx.send(RunEvent::PhaseCompleted {
                        phase: outcome.phase.clone(),
                        outcome: Box::new(outcome),
                    })
                    .await
                    .ok();
                }
            }
            Err(failure) => {
                ctx.statuses[idx] = PhaseStatus::Failed {
                    failure: failure.clone(),
                };
                let outcome = PhaseOutcome::failure(
                    &phase_id,
                    block.index,
                    executions,
                    failure.clone(),
                    duration,
                );
                warn!(phase = %phase_id, attempts = executions, error = %failure, "phase failed");
                ctx.summary.record(outcome.clone());
                failures.push(PhaseFailureDetail {
                    phase: phase_id,
                    failure,
                });
                if let Some(ref tx) = event_tx {
                    tx.send(RunEvent::PhaseCompleted {
                        phase: outcome.phase.clone(),
                        outcome: Box::new(outcome),
                    })
                    .await
                    .ok();
                }
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionRequest, ExecutorFailure, ExecutorOutput};
    use crate::template::PhaseSpec;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Scripted executor: counts executions per phase, fails a phase for its
    /// first `fail_first` calls, then produces the preset artifacts.
    struct ScriptedExecutor {
        outputs: HashMap<String, BTreeMap<String, serde_json::Value>>,
        fail_first: HashMap<String, u32>,
        calls: StdMutex<HashMap<String, u32>>,
        seen_prior: StdMutex<Vec<(String, Option<FailureContext>)>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                outputs: HashMap::new(),
                fail_first: HashMap::new(),
                calls: StdMutex::new(HashMap::new()),
                seen_prior: StdMutex::new(Vec::new()),
            }
        }

        fn produce(mut self, phase: &str, name: &str, value: serde_json::Value) -> Self {
            self.outputs
                .entry(phase.to_string())
                .or_default()
                .insert(name.to_string(), value);
            self
        }

        fn fail_first(mut self, phase: &str, times: u32) -> Self {
            self.fail_first.insert(phase.to_string(), times);
            self
        }

        fn calls_for(&self, phase: &str) -> u32 {
            self.calls.lock().unwrap().get(phase).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            request: ExecutionRequest,
        ) -> Result<ExecutorOutput, ExecutorFailure> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let entry = calls.entry(request.phase_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            self.seen_prior
                .lock()
                .unwrap()
                .push((request.phase_id.clone(), request.prior_failure.clone()));

            if call <= self.fail_first.get(&request.phase_id).copied().unwrap_or(0) {
                return Err(ExecutorFailure::new(format!(
                    "{} scripted failure {call}",
                    request.phase_id
                )));
            }

            Ok(ExecutorOutput {
                artifacts: self
                    .outputs
                    .get(&request.phase_id)
                    .cloned()
                    .unwrap_or_default(),
            })
        }
    }

    fn chain_graph() -> WorkflowGraph {
        WorkflowGraph::build(vec![
            PhaseSpec::new("plan", "planner", vec![]).with_outputs(vec!["plan.md".into()]),
            PhaseSpec::new("design", "designer", vec!["plan".into()])
                .with_requires(vec!["plan.md".into()])
                .with_outputs(vec!["design.md".into()]),
            PhaseSpec::new("build", "builder", vec!["design".into()])
                .with_requires(vec!["design.md".into()])
                .with_outputs(vec!["app.py".into()]),
        ])
        .unwrap()
    }

    fn chain_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .produce("plan", "plan.md", json!("the plan"))
            .produce("design", "design.md", json!("the design"))
            .produce("build", "app.py", json!("the app"))
    }

    fn test_config() -> Config {
        // Millisecond backoff keeps paused-clock tests fast.
        Config::default().with_backoff(crate::retry::BackoffPolicy {
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn linear_chain_succeeds_with_all_artifacts() {
        let executor = Arc::new(chain_executor());
        let orchestrator = Orchestrator::new(test_config(), executor.clone());

        let result = orchestrator.run(chain_graph()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.summary.succeeded, 3);
        assert_eq!(result.summary.blocks_completed, 3);
        assert_eq!(result.artifacts.len(), 3);
        assert!(result.failed_block.is_none());

        // Block order is plan, design, build with one execution each.
        for phase in ["plan", "design", "build"] {
            assert_eq!(executor.calls_for(phase), 1);
        }
        let plan_outcome = &result.summary.phase_outcomes["plan"];
        assert_eq!(plan_outcome.block, 0);
        assert_eq!(result.summary.phase_outcomes["build"].block, 2);

        // Every phase ends in a terminal success state.
        assert_eq!(result.phase_statuses.len(), 3);
        assert!(result.phase_statuses.values().all(|s| s.is_success()));
        assert!(result.run_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_phase_retries_within_its_block_only() {
        let executor = Arc::new(chain_executor().fail_first("build", 2));
        let orchestrator =
            Orchestrator::new(test_config().with_max_retries(5), executor.clone());

        let result = orchestrator.run(chain_graph()).await.unwrap();

        assert!(result.success);
        // build needed three executions; earlier blocks were never re-run.
        assert_eq!(executor.calls_for("build"), 3);
        assert_eq!(executor.calls_for("plan"), 1);
        assert_eq!(executor.calls_for("design"), 1);
        assert_eq!(result.summary.phase_outcomes["build"].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_phase_receives_prior_failure_context() {
        let executor = Arc::new(chain_executor().fail_first("design", 1));
        let orchestrator =
            Orchestrator::new(test_config().with_max_retries(3), executor.clone());

        let result = orchestrator.run(chain_graph()).await.unwrap();
        assert!(result.success);

        let seen = executor.seen_prior.lock().unwrap();
        let design_calls: Vec<_> = seen.iter().filter(|(p, _)| p == "design").collect();
        assert_eq!(design_calls.len(), 2);
        assert!(design_calls[0].1.is_none());
        let prior = design_calls[1].1.as_ref().unwrap();
        assert_eq!(prior.failures[0].phase, "design");
        assert!(prior.failures[0].error.contains("scripted failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_fast_and_leave_dependents_pending() {
        let executor = Arc::new(chain_executor().fail_first("design", 99));
        let orchestrator =
            Orchestrator::new(test_config().with_max_retries(1), executor.clone());

        let result = orchestrator.run(chain_graph()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_block, Some(1));
        assert!(result.summary.phase_outcomes["plan"].success);

        let design = &result.summary.phase_outcomes["design"];
        assert!(!design.success);
        assert_eq!(design.attempts, 1);

        // build never ran: no outcome recorded, executor never invoked.
        assert!(!result.summary.phase_outcomes.contains_key("build"));
        assert_eq!(executor.calls_for("build"), 0);

        // The lifecycle map reflects where the run stopped.
        assert!(result.phase_statuses["plan"].is_success());
        assert!(matches!(
            result.phase_statuses["design"],
            PhaseStatus::Failed { .. }
        ));
        assert!(result.phase_statuses["build"].is_pending());
        assert_eq!(result.pending_phases(), vec!["build"]);

        match result.run_error() {
            Some(RunError::RetryExhausted {
                block,
                attempts,
                phase,
            }) => {
                assert_eq!(block, 1);
                assert_eq!(attempts, 1);
                assert_eq!(phase, "design");
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_block_resets_succeeded_siblings() {
        // fan: plan -> {frontend, backend} with backend failing once. Both
        // siblings share a block, so frontend is re-run alongside backend.
        let graph = WorkflowGraph::build(vec![
            PhaseSpec::new("plan", "planner", vec![]).with_outputs(vec!["plan.md".into()]),
            PhaseSpec::new("frontend", "builder", vec!["plan".into()])
                .with_outputs(vec!["ui.js".into()]),
            PhaseSpec::new("backend", "builder", vec!["plan".into()])
                .with_outputs(vec!["api.py".into()]),
        ])
        .unwrap();

        let executor = Arc::new(
            ScriptedExecutor::new()
                .produce("plan", "plan.md", json!("p"))
                .produce("frontend", "ui.js", json!("ui"))
                .produce("backend", "api.py", json!("api"))
                .fail_first("backend", 1),
        );
        let orchestrator =
            Orchestrator::new(test_config().with_max_retries(3), executor.clone());

        let result = orchestrator.run(graph).await.unwrap();

        assert!(result.success);
        assert_eq!(executor.calls_for("frontend"), 2);
        assert_eq!(executor.calls_for("backend"), 2);
        // Re-recording after the reset did not trip the duplicate guard.
        assert_eq!(result.artifacts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_declared_output_fails_phase_with_distinct_code() {
        // build declares app.py but the stub produces nothing for it.
        let executor = Arc::new(
            ScriptedExecutor::new()
                .produce("plan", "plan.md", json!("p"))
                .produce("design", "design.md", json!("d")),
        );
        let orchestrator =
            Orchestrator::new(test_config().with_max_retries(1), executor.clone());

        let result = orchestrator.run(chain_graph()).await.unwrap();

        assert!(!result.success);
        let build = &result.summary.phase_outcomes["build"];
        match build.failure.as_ref().unwrap() {
            PhaseFailure::OutputValidation { artifact } => assert_eq!(artifact, "app.py"),
            other => panic!("Expected OutputValidation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_graph_succeeds_trivially() {
        let executor = Arc::new(ScriptedExecutor::new());
        let orchestrator = Orchestrator::new(test_config(), executor);
        let result = orchestrator.run(WorkflowGraph::build(vec![]).unwrap()).await.unwrap();
        assert!(result.success);
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn events_arrive_in_block_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let executor = Arc::new(chain_executor());
        let orchestrator = Orchestrator::new(test_config(), executor).with_event_channel(tx);

        let result = orchestrator.run(chain_graph()).await.unwrap();
        assert!(result.success);

        let mut started = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::PhaseStarted { phase, .. } = event {
                started.push(phase);
            }
        }
        assert_eq!(started, vec!["plan", "design", "build"]);
    }
}
