//! Execution state for one task.
//!
//! ```text
//! Pending ─> Running ⇄ Suspended
//!               │  ▲
//!               ▼  │
//!            Escalated
//!
//! Running | Suspended ─> Completed | Failed | Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::PriorOutput;
use crate::error::FailureReason;
use crate::registry::{CapabilityRef, StageKind, WorkflowTemplate};
use crate::resilience::DegradationLevel;
use crate::signals::{ComplexityProfile, SurfacedSignals, TaskDescription};

/// Lifecycle status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    /// Waiting on a capability call.
    Suspended,
    /// Splicing in stages from a newly matched template.
    Escalated,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Suspended | Escalated | Completed | Failed | Cancelled) => true,
            (Suspended, Running | Failed | Cancelled) => true,
            (Escalated, Running | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Escalated => write!(f, "escalated"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a stage produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Success {
        content: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signals: Option<SurfacedSignals>,
    },
    Failure {
        reason: FailureReason,
    },
}

/// Immutable record of one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub stage_index: usize,
    pub kind: StageKind,
    /// Capability the plan asked for.
    pub capability: CapabilityRef,
    /// Capability that actually answered (differs when a fallback served).
    pub served_by: CapabilityRef,
    pub degradation: DegradationLevel,
    #[serde(flatten)]
    pub outcome: ArtifactOutcome,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResultArtifact {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ArtifactOutcome::Success { .. })
    }

    pub fn signals(&self) -> Option<&SurfacedSignals> {
        match &self.outcome {
            ArtifactOutcome::Success { signals, .. } => signals.as_ref(),
            ArtifactOutcome::Failure { .. } => None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Append-only, ordered artifact history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactLog(Vec<ResultArtifact>);

impl ArtifactLog {
    pub fn push(&mut self, artifact: ResultArtifact) {
        self.0.push(artifact);
    }

    pub fn as_slice(&self) -> &[ResultArtifact] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultArtifact> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&ResultArtifact> {
        self.0.last()
    }

    /// Successful outputs, in execution order, as context for later stages.
    pub fn prior_outputs(&self) -> Vec<PriorOutput> {
        self.0
            .iter()
            .filter_map(|a| match &a.outcome {
                ArtifactOutcome::Success { content, .. } => Some(PriorOutput {
                    kind: a.kind,
                    capability: a.served_by.clone(),
                    content: content.clone(),
                }),
                ArtifactOutcome::Failure { .. } => None,
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a ArtifactLog {
    type Item = &'a ResultArtifact;
    type IntoIter = std::slice::Iter<'a, ResultArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One mid-flight escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Index of the stage after which the escalation happened.
    pub after_stage: usize,
    /// Template whose stages were spliced in.
    pub template: String,
    pub domains: Vec<String>,
    pub priority: i32,
    pub stages_added: usize,
    pub timestamp: DateTime<Utc>,
}

/// Everything known about one task, owned by a single executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub task: TaskDescription,
    pub profile: ComplexityProfile,
    /// The running plan; escalation only appends to `template.stages`.
    pub template: WorkflowTemplate,
    pub current_stage_index: usize,
    pub status: ExecutionStatus,
    pub artifacts: ArtifactLog,
    pub escalation_count: u32,
    /// Domains matched so far, in the order they were first selected.
    pub matched_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalations: Vec<EscalationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(
        task: TaskDescription,
        profile: ComplexityProfile,
        template: WorkflowTemplate,
        matched_domains: Vec<String>,
    ) -> Self {
        Self {
            task,
            profile,
            template,
            current_stage_index: 0,
            status: ExecutionStatus::Pending,
            artifacts: ArtifactLog::default(),
            escalation_count: 0,
            matched_domains,
            escalations: Vec::new(),
            failure: None,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stages_remaining(&self) -> usize {
        self.template
            .stages
            .len()
            .saturating_sub(self.current_stage_index)
    }

    /// Move to `next`, returning the previous status.
    ///
    /// Terminal states are sticky: once reached, further transitions are
    /// ignored.
    pub(crate) fn transition(&mut self, next: ExecutionStatus) -> ExecutionStatus {
        let previous = self.status;
        if previous.is_terminal() {
            return previous;
        }
        debug_assert!(
            previous.can_transition_to(next),
            "invalid transition {previous} -> {next}"
        );
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        previous
    }

    /// Compact one-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} [{}] template={} stages={}/{} escalations={}",
            self.task.id,
            self.status,
            self.template.id,
            self.artifacts.len(),
            self.template.stages.len(),
            self.escalation_count,
        );
        if let Some(reason) = &self.failure {
            out.push_str(&format!(" reason={}", reason.code()));
        }
        out
    }
}
