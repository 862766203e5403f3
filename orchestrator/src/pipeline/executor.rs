//! Pipeline Executor: runs one task's workflow as a state machine.
//!
//! ```text
//! plan:  extract(task) ─> evaluate ─> select ─> ExecutionState (Pending)
//!
//! run:   Pending ─ acquire worker ─> Running
//!          loop over plan.stages:
//!            cancelled? ─> Cancelled
//!            Running ─> Suspended (worker released)
//!                     ─ resilience.run(stage) ─ re-acquire worker ─> Running
//!            cancelled? ─> Cancelled (result discarded)
//!            Err ─> failure artifact ─> Failed
//!            Ok  ─> artifact, absorb signals, re-evaluate triggers
//!                     warranted, adds nothing     ─> observed only
//!                     warranted & under limit     ─> Escalated ─> splice ─> Running
//!                     warranted & at limit        ─> Failed
//!        ─> Completed
//! ```
//!
//! A worker permit is held only while the task is actively running, so a
//! task waiting on a capability does not keep queued tasks from starting.
//! The whole loop runs under the global task timeout when one is set.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::capability::CapabilityRequest;
use crate::error::FailureReason;
use crate::escalation::{evaluate, select, top_priority};
use crate::events::{ExecutionEvent, SharedEventBus};
use crate::otel;
use crate::pipeline::state::{
    ArtifactOutcome, EscalationRecord, ExecutionState, ExecutionStatus, ResultArtifact,
};
use crate::registry::{Registry, StageSpec, Trigger};
use crate::resilience::{DegradationLevel, ResilienceManager};
use crate::signals::{self, TaskDescription};

/// What has been matched so far, for deciding whether a re-evaluation
/// warrants escalation.
#[derive(Debug, Clone, Default)]
struct MatchHistory {
    seen_domains: BTreeSet<String>,
    highest_priority: Option<i32>,
}

impl MatchHistory {
    fn observe(&mut self, matches: &[&Trigger]) {
        for trigger in matches {
            self.seen_domains.insert(trigger.domain.clone());
        }
        if let Some(top) = top_priority(matches) {
            self.highest_priority = Some(self.highest_priority.map_or(top, |h| h.max(top)));
        }
    }

    /// A match warrants escalation when its domain is new or it outranks
    /// everything matched before.
    fn warrants(&self, trigger: &Trigger) -> bool {
        !self.seen_domains.contains(&trigger.domain)
            || self
                .highest_priority
                .map_or(true, |highest| trigger.priority > highest)
    }
}

/// Runs a single task against a registry snapshot.
pub struct PipelineExecutor {
    registry: Arc<Registry>,
    resilience: Arc<ResilienceManager>,
    events: Option<SharedEventBus>,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    status_tx: Option<watch::Sender<ExecutionStatus>>,
    workers: Option<Arc<Semaphore>>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<Registry>, resilience: Arc<ResilienceManager>) -> Self {
        Self {
            registry,
            resilience,
            events: None,
            task_timeout: None,
            cancel: CancellationToken::new(),
            status_tx: None,
            workers: None,
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mirror every status change into `tx`.
    pub fn with_status_channel(mut self, tx: watch::Sender<ExecutionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Share worker slots with other executors. A permit is held while the
    /// task runs and handed back for the duration of every capability call.
    pub fn with_worker_permits(mut self, workers: Arc<Semaphore>) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Extract, evaluate and select without running anything.
    pub fn plan(&self, task: TaskDescription) -> ExecutionState {
        self.prepare(task).0
    }

    fn prepare(&self, task: TaskDescription) -> (ExecutionState, MatchHistory) {
        let profile = signals::extract(&task);
        let matches = evaluate(&self.registry, &profile);
        let selection = select(&matches, &self.registry);

        let mut history = MatchHistory::default();
        history.observe(&matches);

        let state = ExecutionState::new(
            task,
            profile,
            selection.template,
            selection.matched_domains,
        );
        (state, history)
    }

    /// Run `task` to a terminal state. Never returns a non-terminal state.
    pub async fn run(&self, task: TaskDescription) -> ExecutionState {
        let (mut state, mut history) = self.prepare(task);
        let span = otel::task_span(state.task_id(), &state.template.id);
        let started = std::time::Instant::now();

        async {
            self.announce(&state);
            let permit = match self.acquire_worker().await {
                Ok(permit) => permit,
                Err(reason) => {
                    debug!(task_id = %state.task.id, "Task cancelled while queued");
                    self.finish(&mut state, Err(reason));
                    return;
                }
            };
            self.set_status(&mut state, ExecutionStatus::Running);

            let result = match self.task_timeout {
                Some(limit) => {
                    let outcome = tokio::time::timeout(
                        limit,
                        self.drive(&mut state, &mut history, permit),
                    )
                    .await;
                    match outcome {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(
                                task_id = %state.task.id,
                                timeout_ms = limit.as_millis() as u64,
                                stage = state.current_stage_index,
                                "Task exceeded global timeout"
                            );
                            Err(FailureReason::TaskTimeout {
                                after_ms: limit.as_millis() as u64,
                            })
                        }
                    }
                }
                None => self.drive(&mut state, &mut history, permit).await,
            };
            self.finish(&mut state, result);
        }
        .instrument(span.clone())
        .await;

        otel::record_task_result(
            &span,
            &state.status.to_string(),
            state.artifacts.len(),
            state.escalation_count,
            started.elapsed().as_millis() as u64,
        );
        state
    }

    /// Wait for a worker slot, giving up when the task is cancelled first.
    /// `Ok(None)` when no worker limit is configured.
    async fn acquire_worker(&self) -> Result<Option<OwnedSemaphorePermit>, FailureReason> {
        let Some(workers) = &self.workers else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FailureReason::Cancelled),
            permit = Arc::clone(workers).acquire_owned() => Ok(permit.ok()),
        }
    }

    async fn drive(
        &self,
        state: &mut ExecutionState,
        history: &mut MatchHistory,
        mut permit: Option<OwnedSemaphorePermit>,
    ) -> Result<(), FailureReason> {
        while state.current_stage_index < state.template.stages.len() {
            if self.cancel.is_cancelled() {
                return Err(FailureReason::Cancelled);
            }

            let index = state.current_stage_index;
            let stage = state.template.stages[index].clone();
            let request = CapabilityRequest {
                task_id: state.task.id.clone(),
                task_text: state.task.text.clone(),
                hints: state.task.hints.clone(),
                stage_index: index,
                kind: stage.kind,
                capability: stage.required_capability.clone(),
                timeout_ms: stage.timeout_ms,
                profile: state.profile.clone(),
                prior: state.artifacts.prior_outputs(),
            };

            self.publish(ExecutionEvent::StageStarted {
                task_id: state.task.id.clone(),
                stage_index: index,
                kind: stage.kind,
                capability: stage.required_capability.clone(),
                timestamp: Utc::now(),
            });

            let span = otel::stage_span(
                index,
                &stage.kind.to_string(),
                stage.required_capability.as_str(),
            );
            let started_at = Utc::now();
            self.set_status(state, ExecutionStatus::Suspended);
            drop(permit.take());
            let result = self
                .resilience
                .run(&stage, &request, &self.cancel)
                .instrument(span.clone())
                .await;
            permit = self.acquire_worker().await.ok().flatten();

            if self.cancel.is_cancelled() {
                debug!(
                    task_id = %state.task.id,
                    stage = index,
                    "Discarding stage result of cancelled task"
                );
                return Err(FailureReason::Cancelled);
            }
            self.set_status(state, ExecutionStatus::Running);

            match result {
                Ok(artifact) => {
                    otel::record_stage_result(
                        &span,
                        artifact.served_by.as_str(),
                        &artifact.degradation.to_string(),
                        artifact.attempts,
                    );
                    info!(
                        task_id = %state.task.id,
                        stage = index,
                        kind = %stage.kind,
                        served_by = %artifact.served_by,
                        degradation = %artifact.degradation,
                        attempts = artifact.attempts,
                        "Stage completed"
                    );
                    self.publish(ExecutionEvent::StageCompleted {
                        task_id: state.task.id.clone(),
                        stage_index: index,
                        served_by: artifact.served_by.clone(),
                        degradation: artifact.degradation,
                        attempts: artifact.attempts,
                        timestamp: Utc::now(),
                    });

                    let surfaced = artifact.signals().filter(|s| !s.is_empty()).cloned();
                    state.artifacts.push(artifact);
                    if let Some(surfaced) = surfaced {
                        state.profile = state.profile.absorb(&surfaced);
                        debug!(
                            task_id = %state.task.id,
                            profile = %state.profile.summary(),
                            "Profile re-derived from stage signals"
                        );
                    }

                    self.check_escalation(state, history)?;
                    state.current_stage_index += 1;
                }
                Err(err) => {
                    let reason = err.reason();
                    otel::record_stage_result(
                        &span,
                        err.capability().as_str(),
                        &DegradationLevel::Unavailable.to_string(),
                        err.attempts(),
                    );
                    state.artifacts.push(ResultArtifact {
                        stage_index: index,
                        kind: stage.kind,
                        capability: stage.required_capability.clone(),
                        served_by: err.capability().clone(),
                        degradation: DegradationLevel::Unavailable,
                        outcome: ArtifactOutcome::Failure {
                            reason: reason.clone(),
                        },
                        attempts: err.attempts(),
                        started_at,
                        finished_at: Utc::now(),
                    });
                    self.publish(ExecutionEvent::StageFailed {
                        task_id: state.task.id.clone(),
                        stage_index: index,
                        reason: reason.clone(),
                        timestamp: Utc::now(),
                    });
                    return Err(reason);
                }
            }
        }
        Ok(())
    }

    /// Re-evaluate triggers after a stage and splice in new stages if a
    /// new or higher-priority trigger matches.
    fn check_escalation(
        &self,
        state: &mut ExecutionState,
        history: &mut MatchHistory,
    ) -> Result<(), FailureReason> {
        let matches = evaluate(&self.registry, &state.profile);
        let warranted: Vec<&Trigger> = matches
            .iter()
            .copied()
            .filter(|t| history.warrants(t))
            .collect();
        if warranted.is_empty() {
            return Ok(());
        }

        let mut domains: Vec<String> = Vec::new();
        for trigger in &warranted {
            if !domains.contains(&trigger.domain) {
                domains.push(trigger.domain.clone());
            }
        }

        let selection = select(&warranted, &self.registry);
        let missing = missing_stages(&state.template.stages, &selection.template.stages);
        if missing.is_empty() {
            history.observe(&matches);
            debug!(
                task_id = %state.task.id,
                template = %selection.template.id,
                domains = ?domains,
                "Warranted escalation adds no stages, recorded as observed"
            );
            return Ok(());
        }

        let limit = state.template.max_escalations;
        if state.escalation_count >= limit {
            warn!(
                task_id = %state.task.id,
                limit,
                domains = ?domains,
                "Escalation warranted but limit reached"
            );
            return Err(FailureReason::EscalationLimitExceeded { limit, domains });
        }

        self.set_status(state, ExecutionStatus::Escalated);
        let stages_added = insert_after(
            &mut state.template.stages,
            state.current_stage_index,
            missing,
        );
        state.escalation_count += 1;
        for domain in &selection.matched_domains {
            if !state.matched_domains.contains(domain) {
                state.matched_domains.push(domain.clone());
            }
        }
        history.observe(&matches);

        let _span = otel::escalation_span(
            &state.task.id,
            &selection.template.id,
            &domains.join(","),
            state.escalation_count,
        )
        .entered();
        info!(
            task_id = %state.task.id,
            escalation = state.escalation_count,
            limit,
            template = %selection.template.id,
            domains = ?domains,
            stages_added,
            "Escalating workflow"
        );

        state.escalations.push(EscalationRecord {
            after_stage: state.current_stage_index,
            template: selection.template.id.clone(),
            domains: domains.clone(),
            priority: selection.priority.unwrap_or_default(),
            stages_added,
            timestamp: Utc::now(),
        });
        self.publish(ExecutionEvent::Escalated {
            task_id: state.task.id.clone(),
            escalation: state.escalation_count,
            template: selection.template.id,
            domains,
            stages_added,
            timestamp: Utc::now(),
        });
        self.set_status(state, ExecutionStatus::Running);
        Ok(())
    }

    fn finish(&self, state: &mut ExecutionState, result: Result<(), FailureReason>) {
        match result {
            Ok(()) => {
                self.set_status(state, ExecutionStatus::Completed);
                info!(
                    task_id = %state.task.id,
                    stages = state.artifacts.len(),
                    escalations = state.escalation_count,
                    "Task completed"
                );
            }
            Err(reason) => {
                let status = if reason.is_cancellation() {
                    ExecutionStatus::Cancelled
                } else {
                    ExecutionStatus::Failed
                };
                warn!(
                    task_id = %state.task.id,
                    status = %status,
                    reason = %reason,
                    code = reason.code(),
                    "Task did not complete"
                );
                state.failure = Some(reason);
                self.set_status(state, status);
            }
        }

        self.publish(ExecutionEvent::TaskFinished {
            task_id: state.task.id.clone(),
            status: state.status,
            failure: state.failure.clone(),
            artifacts: state.artifacts.len(),
            escalations: state.escalation_count,
            timestamp: Utc::now(),
        });
    }

    fn announce(&self, state: &ExecutionState) {
        info!(
            task_id = %state.task.id,
            template = %state.template.id,
            stages = state.template.stages.len(),
            domains = ?state.matched_domains,
            profile = %state.profile.summary(),
            "Task planned"
        );
        self.publish(ExecutionEvent::TaskPlanned {
            task_id: state.task.id.clone(),
            template: state.template.id.clone(),
            stages: state.template.stages.len(),
            domains: state.matched_domains.clone(),
            profile: state.profile.summary(),
            timestamp: Utc::now(),
        });
    }

    fn set_status(&self, state: &mut ExecutionState, next: ExecutionStatus) {
        let from = state.transition(next);
        if from == next || from.is_terminal() {
            return;
        }
        debug!(task_id = %state.task.id, from = %from, to = %next, "Status changed");
        if let Some(tx) = &self.status_tx {
            tx.send_replace(next);
        }
        self.publish(ExecutionEvent::StatusChanged {
            task_id: state.task.id.clone(),
            from,
            to: next,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// Stages of `incoming` not already in `plan`, in their original order and
/// without repeats.
fn missing_stages(plan: &[StageSpec], incoming: &[StageSpec]) -> Vec<StageSpec> {
    let mut missing: Vec<StageSpec> = Vec::new();
    for stage in incoming {
        let present = plan.iter().any(|s| s.same_stage(stage))
            || missing.iter().any(|s| s.same_stage(stage));
        if !present {
            missing.push(stage.clone());
        }
    }
    missing
}

/// Insert `stages` right after `current`. Returns how many were inserted.
fn insert_after(plan: &mut Vec<StageSpec>, current: usize, stages: Vec<StageSpec>) -> usize {
    let added = stages.len();
    let at = (current + 1).min(plan.len());
    plan.splice(at..at, stages);
    added
}
