//! Capabilities: the uniform interface to external analysis providers
//!
//! Semantic context, reasoning, consensus and key/value project memory
//! are all reached through [`Capability`]. The orchestrator never inspects
//! what a capability does internally; it only sees a request, an output,
//! or one of three errors.

pub mod http;

pub use http::HttpCapability;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{CapabilityRef, StageKind};
use crate::signals::{ComplexityProfile, SurfacedSignals};

/// Errors a capability may report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The call did not return within the stage timeout
    #[error("timed out")]
    Timeout,

    /// The provider could not be reached or refused service
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with an error of its own
    #[error("capability error: {0}")]
    Failed(String),
}

impl CapabilityError {
    /// Timeouts and unavailability are retried; provider errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Output of an earlier stage, handed to later stages as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorOutput {
    pub kind: StageKind,
    pub capability: CapabilityRef,
    pub content: serde_json::Value,
}

/// Everything a capability receives for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub task_id: String,
    pub task_text: String,
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
    pub stage_index: usize,
    pub kind: StageKind,
    pub capability: CapabilityRef,
    pub timeout_ms: u64,
    pub profile: ComplexityProfile,
    #[serde(default)]
    pub prior: Vec<PriorOutput>,
}

/// Successful capability response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    #[serde(default)]
    pub content: serde_json::Value,
    /// New complexity information observed while running the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<SurfacedSignals>,
}

impl CapabilityOutput {
    pub fn new(content: impl Into<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            signals: None,
        }
    }

    pub fn with_signals(mut self, signals: SurfacedSignals) -> Self {
        self.signals = Some(signals);
        self
    }
}

/// An external analysis provider.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run one stage. Timeouts are enforced by the caller.
    async fn invoke(&self, request: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityError>;
}

/// Name → implementation lookup shared by every execution.
#[derive(Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<CapabilityRef, Arc<dyn Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        self.insert(name, capability);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.entries.insert(CapabilityRef::new(name), capability);
    }

    pub fn get(&self, name: &CapabilityRef) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &CapabilityRef) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(CapabilityRef::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("names", &self.names())
            .finish()
    }
}
