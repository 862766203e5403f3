//! Complexity-Triggered Workflow Orchestration
//!
//! Decides, from measurable signals rather than free-form judgement, which
//! analysis stages a task needs, runs them, and escalates to a heavier
//! pipeline mid-flight when a stage surfaces new complexity.
//!
//! ```text
//! TaskDescription
//!   └─ signals::extract ─> ComplexityProfile
//!        └─ escalation::evaluate(Registry) ─> [Trigger]
//!             └─ escalation::select ─> WorkflowTemplate
//!                  └─ PipelineExecutor::run
//!                       loop: ResilienceManager::run(stage)
//!                             ─> absorb signals ─> re-evaluate ─> maybe escalate
//!                       ─> ExecutionState (Completed | Failed | Cancelled)
//! ```
//!
//! Capabilities (semantic context, reasoning, consensus, project memory)
//! are external and reached only through [`Capability`]. Many tasks run in
//! parallel through [`WorkerPool`]; stages within one task never do.
//!
//! # Usage
//!
//! ```rust,ignore
//! use orchestrator::{OrchestratorConfig, Registry, SharedRegistry, WorkerPool};
//!
//! let registry = Registry::from_path(Path::new("registry.toml"))?;
//! let pool = WorkerPool::with_defaults(
//!     OrchestratorConfig::default(),
//!     Arc::new(SharedRegistry::new(registry)),
//!     capabilities,
//! );
//! let state = pool.submit(TaskDescription::new("Migrate auth service"))?.wait().await?;
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod otel;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod resilience;
pub mod signals;

// Re-export signal types
pub use signals::{extract, ComplexityProfile, Severity, SignalExtractor, SurfacedSignals, TaskDescription};

// Re-export registry types
pub use registry::{
    CapabilityRef, Registry, RegistryBuilder, RegistryConfig, SharedRegistry, StageKind,
    StageSpec, Trigger, TriggerCondition, TriggerConfig, TriggerPredicate, WorkflowTemplate,
};

// Re-export escalation types
pub use escalation::{evaluate, select, Selection};

// Re-export capability types
pub use capability::{
    Capability, CapabilityError, CapabilityOutput, CapabilityRequest, CapabilityTable,
    HttpCapability, PriorOutput,
};

// Re-export execution types
pub use pipeline::{
    ArtifactLog, ArtifactOutcome, EscalationRecord, ExecutionState, ExecutionStatus,
    PipelineExecutor, ResultArtifact,
};
pub use pool::{PoolError, TaskHandle, WorkerPool};
pub use resilience::{CapabilityHealth, DegradationLevel, ResilienceManager, RetryPolicy, StageError};

// Re-export event types
pub use events::{EventBus, ExecutionEvent, SharedEventBus};

// Re-export error and config types
pub use config::OrchestratorConfig;
pub use error::{ConfigError, ConfigResult, FailureReason};
