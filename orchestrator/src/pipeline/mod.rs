//! Staged pipeline execution for a single task.

pub mod executor;
pub mod state;

pub use executor::PipelineExecutor;
pub use state::{
    ArtifactLog, ArtifactOutcome, EscalationRecord, ExecutionState, ExecutionStatus,
    ResultArtifact,
};
