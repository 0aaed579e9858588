//! Block-level retry with bounded exponential backoff.
//!
//! The retry unit is always the whole block: when any phase of an attempt
//! fails, every phase in the block is re-run on the next attempt, including
//! siblings that individually succeeded, since their outputs may be invalid
//! context for a corrected sibling.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::PhaseFailure;
use crate::events::RunEvent;
use crate::executor::{FailureContext, PriorPhaseFailure};

/// Exponential backoff parameters: `min(max_delay, base_delay * 2^(n-1))`
/// after the n-th failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Per-block retry bookkeeping. Created when the block is first scheduled,
/// discarded once it succeeds or the run aborts.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts_used: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_used: 0,
            max_attempts,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }
}

/// One phase's failure within a block attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFailureDetail {
    pub phase: String,
    pub failure: PhaseFailure,
}

/// Outcome of running a block to success or retry exhaustion.
#[derive(Debug, Clone)]
pub struct BlockResult {
    pub block: usize,
    pub attempts_used: u32,
    pub success: bool,
    /// Failures of the last attempt when not successful
    pub failures: Vec<PhaseFailureDetail>,
}

/// Wraps block execution with bounded exponential-backoff retry.
pub struct RetryCoordinator {
    max_attempts: u32,
    backoff: BackoffPolicy,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl RetryCoordinator {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run a block until it succeeds or attempts are exhausted.
    ///
    /// `attempt_fn(attempt, prior_failure)` executes every phase of the block
    /// once and returns the per-phase failures (empty means the attempt
    /// succeeded). The prior-failure context of a retried attempt carries the
    /// previous attempt's failures for the executor to self-correct on.
    pub async fn run_block<F, Fut>(&self, block: usize, mut attempt_fn: F) -> BlockResult
    where
        F: FnMut(u32, Option<FailureContext>) -> Fut,
        Fut: Future<Output = Vec<PhaseFailureDetail>>,
    {
        let mut state = RetryState::new(self.max_attempts);
        let mut prior: Option<FailureContext> = None;

        loop {
            let attempt = state.attempts_used + 1;
            let failures = attempt_fn(attempt, prior.take()).await;
            state.attempts_used = attempt;

            if failures.is_empty() {
                info!(block, attempts = attempt, "block succeeded");
                return BlockResult {
                    block,
                    attempts_used: attempt,
                    success: true,
                    failures: Vec::new(),
                };
            }

            if state.exhausted() {
                warn!(block, attempts = attempt, "block retries exhausted");
                return BlockResult {
                    block,
                    attempts_used: attempt,
                    success: false,
                    failures,
                };
            }

            let delay = self.backoff.delay_after(attempt);

            warn!(
                block,
                attempt,
                delay_ms = delay.as_millis() as u64,
                failed = ?failures.iter().map(|f| f.phase.as_str()).collect::<Vec<_>>(),
                "block attempt failed, backing off before retry"
            );

            if let Some(ref tx) = self.event_tx {
                tx.send(RunEvent::BlockRetry {
                    block,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    failed_phases: failures.iter().map(|f| f.phase.clone()).collect(),
                })
                .await
                .ok();
            }

            prior = Some(FailureContext {
                attempt,
                failures: failures
                    .iter()
                    .map(|f| PriorPhaseFailure {
                        phase: f.phase.clone(),
                        error: f.failure.to_string(),
                    })
                    .collect(),
            });

            tokio::time::sleep(delay).await;
        }
    }
}
