//! Orchestrator runtime configuration.
//!
//! Defaults come from environment variables so deployments can tune the
//! pool without a config file:
//!
//! | Variable                 | Default | Meaning                             |
//! |--------------------------|---------|-------------------------------------|
//! | `ORCH_WORKERS`           | 4       | concurrently running tasks          |
//! | `ORCH_RETRY_BASE_MS`     | 200     | backoff before the first retry      |
//! | `ORCH_MAX_ATTEMPTS`      | 2       | attempts per stage, incl. the first |
//! | `ORCH_TASK_TIMEOUT_SECS` | 600     | global per-task timeout (0 = none)  |

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::resilience::RetryPolicy;

/// Runtime knobs for the worker pool and resilience layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks executing at once.
    pub workers: usize,
    /// Global per-task timeout in seconds; `None` disables it.
    pub task_timeout_secs: Option<u64>,
    /// Retry policy applied to every stage.
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let timeout: u64 = env_or("ORCH_TASK_TIMEOUT_SECS", 600);
        Self {
            workers: env_or("ORCH_WORKERS", 4usize).max(1),
            task_timeout_secs: (timeout > 0).then_some(timeout),
            retry: RetryPolicy {
                max_attempts: env_or("ORCH_MAX_ATTEMPTS", 2u32).max(1),
                base_delay_ms: env_or("ORCH_RETRY_BASE_MS", 200u64),
            },
        }
    }
}

impl OrchestratorConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout_secs = timeout.map(|d| d.as_secs().max(1));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Read `key` from the environment, falling back to `default` when unset
/// or unparseable.
fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Ignoring unparseable env var");
            default
        }),
        Err(_) => default,
    }
}
