//! Runtime configuration for maestro.
//!
//! Bridges CLI arguments to the knobs the orchestrator needs. Values not
//! supplied on the command line fall back to the defaults the original
//! workflow shapes were tuned for.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Default retry attempts per block.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default per-phase executor timeout, seconds.
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 1800;
/// Default cap on concurrently running phases within a block.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the executor commands run in
    pub project_dir: PathBuf,
    /// Directory holding workflow template YAML files
    pub templates_dir: PathBuf,
    /// Directory holding agent definition YAML files
    pub agents_dir: PathBuf,
    /// Retry attempts per block (minimum 1)
    pub max_retries: u32,
    /// Backoff between block attempts
    pub backoff: BackoffPolicy,
    /// Per-phase executor timeout
    pub phase_timeout: Duration,
    /// Concurrency cap for phases within one block
    pub max_parallel: usize,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            templates_dir: PathBuf::from("templates"),
            agents_dir: PathBuf::from("agents"),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            phase_timeout: Duration::from_secs(DEFAULT_PHASE_TIMEOUT_SECS),
            max_parallel: DEFAULT_MAX_PARALLEL,
            verbose: false,
        }
    }
}

impl Config {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.phase_timeout, Duration::from_secs(1800));
        assert_eq!(config.backoff.base_delay, Duration::from_secs(2));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn builders_clamp_to_minimums() {
        let config = Config::default().with_max_retries(0).with_max_parallel(0);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_parallel, 1);
    }
}
