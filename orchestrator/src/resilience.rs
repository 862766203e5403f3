//! Resilience: timeout, bounded retry and fallback stages
//!
//! Wraps every stage invocation. Instead of letting one flaky provider fail
//! a task outright, the manager retries once with exponential backoff and
//! then walks the stage's fallback chain.
//!
//! # Design
//!
//! ```text
//! StageSpec
//!   ├─ invoke within timeout → ResultArtifact { degradation: Full }
//!   ├─ Timeout / Unavailable → sleep(base · 2^(n-1)) → invoke again
//!   ├─ still failing, fallback set → same procedure on the fallback
//!   │                                → ResultArtifact { degradation: Partial }
//!   └─ chain exhausted → StageError (CapabilityUnavailable | StageTimeout)
//! ```
//!
//! Provider-reported errors (`CapabilityError::Failed`) are not retried but
//! still fall through to the fallback. Fallback chains are finite and
//! cycle-free (checked at registry load), so the walk always terminates.
//!
//! Cancellation is honoured between calls: an in-flight invocation is
//! allowed to finish, but no backoff is slept and no further attempt or
//! fallback is started once the task's token fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::{CapabilityError, CapabilityOutput, CapabilityRequest, CapabilityTable};
use crate::error::FailureReason;
use crate::pipeline::state::{ArtifactOutcome, ResultArtifact};
use crate::registry::{CapabilityRef, StageSpec};

/// How much of the requested capability served a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// The stage's own capability answered.
    Full,
    /// A fallback stage answered.
    Partial,
    /// Nothing answered.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Retry policy for recoverable capability failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per stage, including the first (default 2: one retry).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    /// Default: one retry after 200ms.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
        }
    }
}

/// A stage that could not be served by its capability or any fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("capability '{capability}' unavailable after {attempts} attempt(s): {detail}")]
    CapabilityUnavailable {
        capability: CapabilityRef,
        detail: String,
        attempts: u32,
    },

    #[error("capability '{capability}' timed out after {attempts} attempt(s)")]
    StageTimeout {
        capability: CapabilityRef,
        attempts: u32,
    },

    /// The task was cancelled before the stage could be served
    #[error("stage on '{capability}' cancelled after {attempts} attempt(s)")]
    Cancelled {
        capability: CapabilityRef,
        attempts: u32,
    },
}

/// Why a single capability gave up.
enum AttemptError {
    Capability(CapabilityError),
    Cancelled,
}

impl StageError {
    fn from_capability(capability: &CapabilityRef, err: CapabilityError, attempts: u32) -> Self {
        match err {
            CapabilityError::Timeout => Self::StageTimeout {
                capability: capability.clone(),
                attempts,
            },
            CapabilityError::Unavailable(detail) | CapabilityError::Failed(detail) => {
                Self::CapabilityUnavailable {
                    capability: capability.clone(),
                    detail,
                    attempts,
                }
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::CapabilityUnavailable { attempts, .. }
            | Self::StageTimeout { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn capability(&self) -> &CapabilityRef {
        match self {
            Self::CapabilityUnavailable { capability, .. }
            | Self::StageTimeout { capability, .. }
            | Self::Cancelled { capability, .. } => capability,
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Self::CapabilityUnavailable {
                capability, detail, ..
            } => FailureReason::CapabilityUnavailable {
                capability: capability.to_string(),
                detail: detail.clone(),
            },
            Self::StageTimeout { capability, .. } => FailureReason::StageTimeout {
                capability: capability.to_string(),
            },
            Self::Cancelled { .. } => FailureReason::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Health of one capability, tracked across all executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityHealth {
    pub capability: CapabilityRef,
    pub level: DegradationLevel,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl CapabilityHealth {
    pub fn new(capability: CapabilityRef) -> Self {
        Self {
            capability,
            level: DegradationLevel::Full,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_calls: 0,
            total_failures: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;

        // Recover after 3 consecutive successes
        if self.level != DegradationLevel::Full && self.consecutive_successes >= 3 {
            self.level = DegradationLevel::Full;
            self.last_change = Utc::now();
            self.last_error = None;
        }
    }

    pub fn record_failure(&mut self, error: &str) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.to_string());

        let new_level = if self.consecutive_failures >= 3 {
            DegradationLevel::Unavailable
        } else {
            DegradationLevel::Partial
        };
        if new_level != self.level {
            self.level = new_level;
            self.last_change = Utc::now();
        }
    }

    /// Failure rate as a fraction (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}

/// Runs stages against the capability table with retry and fallback.
#[derive(Debug)]
pub struct ResilienceManager {
    capabilities: CapabilityTable,
    policy: RetryPolicy,
    health: Mutex<HashMap<CapabilityRef, CapabilityHealth>>,
}

impl ResilienceManager {
    pub fn new(capabilities: CapabilityTable, policy: RetryPolicy) -> Self {
        Self {
            capabilities,
            policy,
            health: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Run `stage`, walking its fallback chain if needed.
    ///
    /// `request` carries the task context; its stage fields are overwritten
    /// for each stage actually attempted. Once `cancel` fires no new call is
    /// made and the stage ends with [`StageError::Cancelled`].
    pub async fn run(
        &self,
        stage: &StageSpec,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<ResultArtifact, StageError> {
        let started_at = Utc::now();
        let mut total_attempts = 0u32;
        let mut last_error: Option<StageError> = None;
        let mut cursor = Some(stage);
        let mut depth = 0usize;

        while let Some(current) = cursor {
            if depth > 0 {
                debug!(
                    task_id = %request.task_id,
                    stage = request.stage_index,
                    capability = %current.required_capability,
                    depth,
                    "Running fallback stage"
                );
            }
            match self.attempt(current, request, cancel).await {
                Ok((output, attempts)) => {
                    total_attempts += attempts;
                    return Ok(ResultArtifact {
                        stage_index: request.stage_index,
                        kind: stage.kind,
                        capability: stage.required_capability.clone(),
                        served_by: current.required_capability.clone(),
                        degradation: if depth == 0 {
                            DegradationLevel::Full
                        } else {
                            DegradationLevel::Partial
                        },
                        outcome: ArtifactOutcome::Success {
                            content: output.content,
                            signals: output.signals,
                        },
                        attempts: total_attempts,
                        started_at,
                        finished_at: Utc::now(),
                    });
                }
                Err((AttemptError::Cancelled, attempts)) => {
                    total_attempts += attempts;
                    debug!(
                        task_id = %request.task_id,
                        stage = request.stage_index,
                        capability = %current.required_capability,
                        attempts = total_attempts,
                        "Stage abandoned after cancellation"
                    );
                    return Err(StageError::Cancelled {
                        capability: current.required_capability.clone(),
                        attempts: total_attempts,
                    });
                }
                Err((AttemptError::Capability(err), attempts)) => {
                    total_attempts += attempts;
                    warn!(
                        task_id = %request.task_id,
                        stage = request.stage_index,
                        capability = %current.required_capability,
                        attempts,
                        error = %err,
                        has_fallback = current.fallback.is_some(),
                        "Stage capability failed"
                    );
                    last_error = Some(StageError::from_capability(
                        &current.required_capability,
                        err,
                        total_attempts,
                    ));
                }
            }
            cursor = current.fallback.as_deref();
            depth += 1;
        }

        Err(last_error.unwrap_or_else(|| StageError::CapabilityUnavailable {
            capability: stage.required_capability.clone(),
            detail: "no stage to run".to_string(),
            attempts: total_attempts,
        }))
    }

    /// Invoke one stage (no fallback) with timeout and bounded retry.
    /// Returns the output or the last error, with the attempts used.
    async fn attempt(
        &self,
        stage: &StageSpec,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<(CapabilityOutput, u32), (AttemptError, u32)> {
        if cancel.is_cancelled() {
            return Err((AttemptError::Cancelled, 0));
        }
        let Some(capability) = self.capabilities.get(&stage.required_capability) else {
            let err = CapabilityError::Unavailable(format!(
                "capability '{}' is not registered",
                stage.required_capability
            ));
            self.record(&stage.required_capability, Err(&err));
            return Err((AttemptError::Capability(err), 0));
        };

        let mut request = request.clone();
        request.kind = stage.kind;
        request.capability = stage.required_capability.clone();
        request.timeout_ms = stage.timeout_ms;

        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(stage.timeout(), capability.invoke(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout),
            };

            match result {
                Ok(output) => {
                    self.record(&stage.required_capability, Ok(()));
                    return Ok((output, attempt));
                }
                Err(err) => {
                    self.record(&stage.required_capability, Err(&err));
                    if !err.is_recoverable() || attempt >= max_attempts {
                        return Err((AttemptError::Capability(err), attempt));
                    }
                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        capability = %stage.required_capability,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Recoverable capability error, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err((AttemptError::Cancelled, attempt)),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn record(&self, capability: &CapabilityRef, result: Result<(), &CapabilityError>) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = health
            .entry(capability.clone())
            .or_insert_with(|| CapabilityHealth::new(capability.clone()));
        match result {
            Ok(()) => entry.record_success(),
            Err(err) => entry.record_failure(&err.to_string()),
        }
    }

    /// Health snapshot for one capability, if it has been called.
    pub fn health(&self, capability: &CapabilityRef) -> Option<CapabilityHealth> {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(capability)
            .cloned()
    }

    /// Health snapshots for every capability called so far, by name.
    pub fn health_report(&self) -> Vec<CapabilityHealth> {
        let mut report: Vec<CapabilityHealth> = self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        report.sort_by(|a, b| a.capability.cmp(&b.capability));
        report
    }
}
