//! Integration tests for the pipeline
//!
//! Drives extract → evaluate → select → execute end to end with in-process
//! capabilities, covering selection scenarios, outages, escalation,
//! cancellation and the global task timeout.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::escalation::{evaluate, select};
use orchestrator::{
    extract, ArtifactOutcome, Capability, CapabilityError, CapabilityOutput, CapabilityRequest,
    CapabilityTable, DegradationLevel, EventBus, ExecutionEvent, ExecutionStatus, FailureReason,
    PipelineExecutor, Registry, ResilienceManager, RetryPolicy, StageKind, StageSpec,
    SurfacedSignals, TaskDescription, Trigger, TriggerCondition, WorkflowTemplate,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Always answers with the capability name and stage index.
struct Echo;

#[async_trait]
impl Capability for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        Ok(CapabilityOutput::new(format!(
            "{}@{}",
            request.capability, request.stage_index
        )))
    }
}

/// Always unavailable, optionally after a delay; counts calls.
#[derive(Default)]
struct Down {
    delay: Duration,
    calls: AtomicU32,
}

impl Down {
    fn after(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for Down {
    fn name(&self) -> &str {
        "down"
    }

    async fn invoke(&self, _request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Err(CapabilityError::Unavailable("connection refused".into()))
    }
}

/// Surfaces a different domain tag on each call, from a fixed list.
struct Discovering {
    tags: Vec<&'static str>,
    calls: AtomicU32,
}

impl Discovering {
    fn new(tags: Vec<&'static str>) -> Self {
        Self {
            tags,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Capability for Discovering {
    fn name(&self) -> &str {
        "discovering"
    }

    async fn invoke(&self, _request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let mut signals = SurfacedSignals::default();
        if let Some(tag) = self.tags.get(n) {
            signals.domain_tags.insert((*tag).to_string());
        }
        Ok(CapabilityOutput::new(format!("finding {n}")).with_signals(signals))
    }
}

/// Sleeps before answering.
struct Slow(Duration);

#[async_trait]
impl Capability for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn invoke(&self, _request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError> {
        tokio::time::sleep(self.0).await;
        Ok(CapabilityOutput::new("late answer"))
    }
}

fn stage(kind: StageKind, capability: &str) -> StageSpec {
    StageSpec::new(kind, capability)
}

fn s1() -> StageSpec {
    stage(StageKind::SemanticContext, "semantic")
}

fn s2() -> StageSpec {
    stage(StageKind::Reasoning, "reasoning")
}

fn s3() -> StageSpec {
    stage(StageKind::Consensus, "panel")
}

/// quick = [s1]; A = [s1, s2]; B = [s2, s3].
/// architecture (10) → A when decision_points ≥ 3; security (10) → B on the security tag.
fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new("quick", vec![s1()]).with_max_escalations(1))
            .template(WorkflowTemplate::new("A", vec![s1(), s2()]).with_max_escalations(2))
            .template(WorkflowTemplate::new("B", vec![s2(), s3()]).with_max_escalations(2))
            .trigger(Trigger::new(
                "architecture",
                10,
                "A",
                TriggerCondition::default().min_decision_points(3),
            ))
            .trigger(Trigger::new(
                "security",
                10,
                "B",
                TriggerCondition::default().any_tag("security"),
            ))
            .build()
            .expect("test registry should be valid"),
    )
}

fn echo_table() -> CapabilityTable {
    CapabilityTable::new()
        .register("semantic", Arc::new(Echo))
        .register("reasoning", Arc::new(Echo))
        .register("panel", Arc::new(Echo))
}

fn executor(registry: Arc<Registry>, table: CapabilityTable) -> PipelineExecutor {
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 50,
    };
    PipelineExecutor::new(registry, Arc::new(ResilienceManager::new(table, policy)))
}

fn capabilities(state: &orchestrator::ExecutionState) -> Vec<String> {
    state
        .template
        .stages
        .iter()
        .map(|s| s.required_capability.to_string())
        .collect()
}

// ── Selection scenarios ──────────────────────────────────────────────

#[tokio::test]
async fn test_minimal_task_runs_default_template() {
    let exec = executor(registry(), echo_table());
    let task = TaskDescription::new("");
    assert!(extract(&task).is_minimal());

    let state = exec.run(task).await;
    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.template.id, "quick");
    assert_eq!(state.escalation_count, 0);
    assert_eq!(state.artifacts.len(), 1);
    assert!(state.failure.is_none());
}

#[test]
fn test_single_high_priority_match_selects_exact_template() {
    let reg = registry();
    let task = TaskDescription::new("").with_hint("decision_points", "3");
    let profile = extract(&task);
    assert_eq!(profile.decision_points, 3);

    let matches = evaluate(&reg, &profile);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].domain, "architecture");

    let selection = select(&matches, &reg);
    assert_eq!(selection.template, *reg.template("A").unwrap());
}

#[test]
fn test_equal_priority_templates_merge_in_first_occurrence_order() {
    let reg = registry();
    let task = TaskDescription::new("")
        .with_hint("decision_points", "3")
        .with_hint("tags", "security");
    let exec = executor(Arc::clone(&reg), echo_table());
    let state = exec.plan(task);

    assert_eq!(state.status, ExecutionStatus::Pending);
    assert_eq!(state.template.stages, vec![s1(), s2(), s3()]);
    assert_eq!(state.matched_domains, vec!["architecture", "security"]);
}

#[test]
fn test_no_match_selects_default_never_errors() {
    let reg = registry();
    let profile = extract(&TaskDescription::new("rename a variable"));
    let matches = evaluate(&reg, &profile);
    assert!(matches.is_empty());
    assert_eq!(select(&matches, &reg).template.id, "quick");
}

#[test]
fn test_identical_tasks_plan_identically() {
    let exec = executor(registry(), echo_table());
    let text = "Refactor the payment module, then migrate the database and update the API.";
    let a = TaskDescription::new(text).with_hint("environment", "production");
    let b = TaskDescription::new(text).with_hint("environment", "production");
    assert_ne!(a.id, b.id);

    assert_eq!(extract(&a), extract(&b));
    let (pa, pb) = (exec.plan(a), exec.plan(b));
    assert_eq!(pa.template, pb.template);
    assert_eq!(pa.matched_domains, pb.matched_domains);
}

// ── Resilience scenarios ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_outage_with_fallback_completes() {
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new(
                "quick",
                vec![stage(StageKind::Reasoning, "reasoning")
                    .with_fallback(stage(StageKind::Reasoning, "reasoning-lite"))],
            ))
            .build()
            .unwrap(),
    );
    let down = Arc::new(Down::default());
    let table = CapabilityTable::new()
        .register("reasoning", down.clone())
        .register("reasoning-lite", Arc::new(Echo));

    let state = executor(reg, table).run(TaskDescription::new("")).await;

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(down.calls(), 2);
    let artifact = state.artifacts.last().unwrap();
    assert_eq!(artifact.degradation, DegradationLevel::Partial);
    assert_eq!(artifact.served_by.as_str(), "reasoning-lite");
    assert!(artifact.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_outage_without_fallback_fails() {
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new(
                "quick",
                vec![s1(), stage(StageKind::Reasoning, "reasoning")],
            ))
            .build()
            .unwrap(),
    );
    let table = CapabilityTable::new()
        .register("semantic", Arc::new(Echo))
        .register("reasoning", Arc::new(Down::default()));

    let state = executor(reg, table).run(TaskDescription::new("")).await;

    assert_eq!(state.status, ExecutionStatus::Failed);
    let reason = state.failure.clone().unwrap();
    assert_eq!(reason.code(), "capability_unavailable");
    assert_eq!(state.artifacts.len(), 2);
    let last = state.artifacts.last().unwrap();
    assert_eq!(last.degradation, DegradationLevel::Unavailable);
    assert_eq!(last.outcome, ArtifactOutcome::Failure { reason });
}

// ── Escalation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_surfaced_signals_trigger_escalation() {
    let table = echo_table().register("semantic", Arc::new(Discovering::new(vec!["security"])));
    let state = executor(registry(), table).run(TaskDescription::new("")).await;

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.escalation_count, 1);
    assert_eq!(capabilities(&state), vec!["semantic", "reasoning", "panel"]);
    assert_eq!(state.artifacts.len(), 3);
    assert!(state.profile.has_tag("security"));
    assert_eq!(state.escalations[0].template, "B");
}

#[tokio::test]
async fn test_escalation_is_bounded_by_max_escalations() {
    // quick allows one escalation; the second discovery exceeds it.
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new("quick", vec![s1()]).with_max_escalations(1))
            .template(WorkflowTemplate::new("B", vec![s2()]))
            .template(WorkflowTemplate::new("C", vec![s3()]))
            .trigger(Trigger::new(
                "security",
                10,
                "B",
                TriggerCondition::default().any_tag("security"),
            ))
            .trigger(Trigger::new(
                "performance",
                5,
                "C",
                TriggerCondition::default().any_tag("performance"),
            ))
            .build()
            .unwrap(),
    );
    let discovering = Arc::new(Discovering::new(vec!["security", "performance"]));
    let table = CapabilityTable::new()
        .register("semantic", discovering.clone())
        .register("reasoning", discovering)
        .register("panel", Arc::new(Echo));

    let state = executor(reg, table).run(TaskDescription::new("")).await;

    assert_eq!(state.status, ExecutionStatus::Failed);
    assert_eq!(state.escalation_count, 1);
    assert!(state.escalation_count <= state.template.max_escalations);
    assert_eq!(
        state.failure,
        Some(FailureReason::EscalationLimitExceeded {
            limit: 1,
            domains: vec!["performance".to_string()],
        })
    );
}

#[tokio::test]
async fn test_artifacts_follow_stage_order() {
    let bus = EventBus::new().shared();
    let mut events = bus.subscribe();
    let table = echo_table().register("semantic", Arc::new(Discovering::new(vec!["security"])));
    let state = executor(registry(), table)
        .with_events(Arc::clone(&bus))
        .run(TaskDescription::new("").with_id("ordered"))
        .await;

    let indices: Vec<usize> = state.artifacts.iter().map(|a| a.stage_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let mut completed = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::StageCompleted { stage_index, .. } => completed.push(stage_index),
            ExecutionEvent::TaskFinished { status, .. } => {
                finished = true;
                assert_eq!(status, ExecutionStatus::Completed);
            }
            _ => {}
        }
    }
    assert_eq!(completed, indices);
    assert!(finished);
}

// ── Cancellation and timeouts ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cancel_during_capability_call_discards_result() {
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new(
                "quick",
                vec![stage(StageKind::Reasoning, "slow"), s1()],
            ))
            .build()
            .unwrap(),
    );
    let table = echo_table().register("slow", Arc::new(Slow(Duration::from_secs(5))));
    let cancel = CancellationToken::new();
    let (tx, mut rx) = watch::channel(ExecutionStatus::Pending);
    let exec = executor(reg, table)
        .with_cancellation(cancel.clone())
        .with_status_channel(tx);

    let run = tokio::spawn(async move { exec.run(TaskDescription::new("")).await });
    rx.wait_for(|s| *s == ExecutionStatus::Suspended).await.unwrap();
    cancel.cancel();

    let state = run.await.unwrap();
    assert_eq!(state.status, ExecutionStatus::Cancelled);
    assert_eq!(state.failure, Some(FailureReason::Cancelled));
    assert!(state.artifacts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_failing_call_stops_retry_and_fallback() {
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new(
                "quick",
                vec![stage(StageKind::Reasoning, "reasoning")
                    .with_fallback(stage(StageKind::Reasoning, "reasoning-lite"))],
            ))
            .build()
            .unwrap(),
    );
    let primary = Arc::new(Down::after(Duration::from_secs(2)));
    let lite = Arc::new(Down::default());
    let table = CapabilityTable::new()
        .register("reasoning", primary.clone())
        .register("reasoning-lite", lite.clone());
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 10_000,
    };
    let cancel = CancellationToken::new();
    let (tx, mut rx) = watch::channel(ExecutionStatus::Pending);
    let exec = PipelineExecutor::new(reg, Arc::new(ResilienceManager::new(table, policy)))
        .with_cancellation(cancel.clone())
        .with_status_channel(tx);

    let run = tokio::spawn(async move { exec.run(TaskDescription::new("")).await });
    rx.wait_for(|s| *s == ExecutionStatus::Suspended).await.unwrap();
    let cancelled_at = tokio::time::Instant::now();
    cancel.cancel();

    let state = run.await.unwrap();
    assert_eq!(state.status, ExecutionStatus::Cancelled);
    assert_eq!(state.failure, Some(FailureReason::Cancelled));
    assert!(state.artifacts.is_empty());
    // The in-flight call finishes; no backoff, retry or fallback follows.
    assert_eq!(primary.calls(), 1);
    assert_eq!(lite.calls(), 0);
    assert!(cancelled_at.elapsed() <= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_global_task_timeout_fails_task() {
    let reg = Arc::new(
        Registry::builder("quick")
            .template(WorkflowTemplate::new(
                "quick",
                vec![stage(StageKind::Reasoning, "slow").with_timeout(Duration::from_secs(120))],
            ))
            .build()
            .unwrap(),
    );
    let table = CapabilityTable::new().register("slow", Arc::new(Slow(Duration::from_secs(60))));
    let state = executor(reg, table)
        .with_task_timeout(Some(Duration::from_secs(1)))
        .run(TaskDescription::new(""))
        .await;

    assert_eq!(state.status, ExecutionStatus::Failed);
    assert_eq!(state.failure, Some(FailureReason::TaskTimeout { after_ms: 1000 }));
    assert!(state.finished_at.is_some());
}

#[test]
fn test_plan_touches_no_capability() {
    let down = Arc::new(Down::default());
    let table = CapabilityTable::new().register("semantic", down.clone());
    let state = executor(registry(), table).plan(TaskDescription::new(""));
    assert_eq!(state.status, ExecutionStatus::Pending);
    assert_eq!(down.calls(), 0);
    let domains: BTreeSet<&str> = state.matched_domains.iter().map(String::as_str).collect();
    assert!(domains.is_empty());
}
