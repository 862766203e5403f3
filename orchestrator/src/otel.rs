//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the orchestration pipeline. Field
//! names use dot notation so an OTel exporter layer can pick them up as-is.
//!
//! # Span Hierarchy
//!
//! ```text
//! orch.task                 (root, one per submitted task)
//!   ├─ orch.stage           (one per executed stage, fallbacks included)
//!   └─ orch.escalation      (point-in-time splice decision)
//! ```

use tracing::Span;

/// Root span for one task, end to end.
pub const SPAN_TASK: &str = "orch.task";

/// One stage, including its retries and fallbacks.
pub const SPAN_STAGE: &str = "orch.stage";

/// Mid-flight escalation decision.
pub const SPAN_ESCALATION: &str = "orch.escalation";

/// Create the root span for a task.
///
/// Fields filled at creation: `task.id`, `orch.template`.
/// Fields filled later via [`record_task_result`]: status, stage and escalation counts.
pub fn task_span(task_id: &str, template: &str) -> Span {
    tracing::info_span!(
        "orch.task",
        "task.id" = %task_id,
        "orch.template" = %template,
        "orch.status" = tracing::field::Empty,
        "orch.stage_count" = tracing::field::Empty,
        "orch.escalation_count" = tracing::field::Empty,
        "orch.duration_ms" = tracing::field::Empty,
    )
}

/// Record the terminal result on a task span.
pub fn record_task_result(
    span: &Span,
    status: &str,
    stage_count: usize,
    escalation_count: u32,
    duration_ms: u64,
) {
    span.record("orch.status", status);
    span.record("orch.stage_count", stage_count as u64);
    span.record("orch.escalation_count", escalation_count);
    span.record("orch.duration_ms", duration_ms);
}

/// Create a span for one stage.
///
/// Fields filled later via [`record_stage_result`]: served-by capability,
/// degradation, attempts.
pub fn stage_span(stage_index: usize, kind: &str, capability: &str) -> Span {
    tracing::info_span!(
        "orch.stage",
        "orch.stage.index" = stage_index as u64,
        "orch.stage.kind" = %kind,
        "orch.capability" = %capability,
        "orch.served_by" = tracing::field::Empty,
        "orch.degradation" = tracing::field::Empty,
        "orch.attempts" = tracing::field::Empty,
    )
}

/// Record the result of a stage.
pub fn record_stage_result(span: &Span, served_by: &str, degradation: &str, attempts: u32) {
    span.record("orch.served_by", served_by);
    span.record("orch.degradation", degradation);
    span.record("orch.attempts", attempts);
}

/// Create a span for an escalation.
///
/// All fields filled at creation since escalation is a point-in-time decision.
pub fn escalation_span(task_id: &str, template: &str, domains: &str, escalation: u32) -> Span {
    tracing::info_span!(
        "orch.escalation",
        "task.id" = %task_id,
        "orch.escalation.template" = %template,
        "orch.escalation.domains" = %domains,
        "orch.escalation.number" = escalation,
    )
}
