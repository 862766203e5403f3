//! Lifecycle events emitted while tasks execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureReason;
use crate::pipeline::state::ExecutionStatus;
use crate::registry::{CapabilityRef, StageKind};
use crate::resilience::DegradationLevel;

/// All execution lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A task's initial workflow was selected
    TaskPlanned {
        task_id: String,
        template: String,
        stages: usize,
        domains: Vec<String>,
        profile: String,
        timestamp: DateTime<Utc>,
    },

    /// A task moved between lifecycle states
    StatusChanged {
        task_id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },

    /// A stage was handed to the resilience layer
    StageStarted {
        task_id: String,
        stage_index: usize,
        kind: StageKind,
        capability: CapabilityRef,
        timestamp: DateTime<Utc>,
    },

    /// A stage produced an artifact
    StageCompleted {
        task_id: String,
        stage_index: usize,
        served_by: CapabilityRef,
        degradation: DegradationLevel,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// A stage could not be served
    StageFailed {
        task_id: String,
        stage_index: usize,
        reason: FailureReason,
        timestamp: DateTime<Utc>,
    },

    /// New stages were spliced into a running plan
    Escalated {
        task_id: String,
        escalation: u32,
        template: String,
        domains: Vec<String>,
        stages_added: usize,
        timestamp: DateTime<Utc>,
    },

    /// A task reached a terminal state
    TaskFinished {
        task_id: String,
        status: ExecutionStatus,
        failure: Option<FailureReason>,
        artifacts: usize,
        escalations: u32,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::TaskPlanned { timestamp, .. } => *timestamp,
            ExecutionEvent::StatusChanged { timestamp, .. } => *timestamp,
            ExecutionEvent::StageStarted { timestamp, .. } => *timestamp,
            ExecutionEvent::StageCompleted { timestamp, .. } => *timestamp,
            ExecutionEvent::StageFailed { timestamp, .. } => *timestamp,
            ExecutionEvent::Escalated { timestamp, .. } => *timestamp,
            ExecutionEvent::TaskFinished { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::TaskPlanned { .. } => "task_planned",
            ExecutionEvent::StatusChanged { .. } => "status_changed",
            ExecutionEvent::StageStarted { .. } => "stage_started",
            ExecutionEvent::StageCompleted { .. } => "stage_completed",
            ExecutionEvent::StageFailed { .. } => "stage_failed",
            ExecutionEvent::Escalated { .. } => "escalated",
            ExecutionEvent::TaskFinished { .. } => "task_finished",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            ExecutionEvent::TaskPlanned { task_id, .. }
            | ExecutionEvent::StatusChanged { task_id, .. }
            | ExecutionEvent::StageStarted { task_id, .. }
            | ExecutionEvent::StageCompleted { task_id, .. }
            | ExecutionEvent::StageFailed { task_id, .. }
            | ExecutionEvent::Escalated { task_id, .. }
            | ExecutionEvent::TaskFinished { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionEvent::TaskFinished { .. })
    }
}
