//! Workflow templates and the stages they are made of.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;

/// Name of an external capability, resolved through the capability table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityRef(String);

impl CapabilityRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CapabilityRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for CapabilityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of analysis a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Semantic code / project context gathering
    SemanticContext,
    /// Multi-step reasoning
    Reasoning,
    /// Single-model validation of prior output
    Validation,
    /// Multi-model consensus
    Consensus,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SemanticContext => write!(f, "semantic_context"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Validation => write!(f, "validation"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// One unit of pipeline work bound to a single capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: StageKind,
    #[serde(rename = "capability")]
    pub required_capability: CapabilityRef,
    /// Lighter stage to run when the capability stays unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<StageSpec>>,
    /// Per-invocation timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl StageSpec {
    pub fn new(kind: StageKind, capability: impl Into<String>) -> Self {
        Self {
            kind,
            required_capability: CapabilityRef::new(capability),
            fallback: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_fallback(mut self, fallback: StageSpec) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Identity used for de-duplication: same kind and same capability.
    /// Timeouts and fallbacks do not participate.
    pub fn same_stage(&self, other: &StageSpec) -> bool {
        self.kind == other.kind && self.required_capability == other.required_capability
    }

    /// Number of fallbacks below this stage.
    pub fn fallback_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.fallback.as_deref();
        while let Some(stage) = cursor {
            depth += 1;
            cursor = stage.fallback.as_deref();
        }
        depth
    }

    /// Check that no capability repeats along the fallback chain.
    pub(crate) fn validate(&self, template: &str) -> Result<(), ConfigError> {
        let mut seen: HashSet<&CapabilityRef> = HashSet::new();
        let mut cursor = Some(self);
        while let Some(stage) = cursor {
            if stage.required_capability.as_str().trim().is_empty() {
                return Err(ConfigError::InvalidStage {
                    template: template.to_string(),
                    message: format!("{} stage has an empty capability", stage.kind),
                });
            }
            if stage.timeout_ms == 0 {
                return Err(ConfigError::InvalidStage {
                    template: template.to_string(),
                    message: format!(
                        "{} stage on '{}' has a zero timeout",
                        stage.kind, stage.required_capability
                    ),
                });
            }
            if !seen.insert(&stage.required_capability) {
                return Err(ConfigError::FallbackCycle {
                    template: template.to_string(),
                    capability: stage.required_capability.to_string(),
                });
            }
            cursor = stage.fallback.as_deref();
        }
        Ok(())
    }
}

/// An ordered, reusable list of stages associated with a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    #[serde(default)]
    pub domain: String,
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub max_escalations: u32,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        let id = id.into();
        Self {
            domain: id.clone(),
            id,
            stages,
            max_escalations: 0,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_max_escalations(mut self, max: u32) -> Self {
        self.max_escalations = max;
        self
    }

    /// Whether a stage with the same kind and capability is already listed.
    pub fn contains_stage(&self, stage: &StageSpec) -> bool {
        self.stages.iter().any(|s| s.same_stage(stage))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyStages {
                template: self.id.clone(),
            });
        }
        for stage in &self.stages {
            stage.validate(&self.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_stage_ignores_timeout_and_fallback() {
        let a = StageSpec::new(StageKind::Reasoning, "deep").with_timeout(Duration::from_secs(5));
        let b = StageSpec::new(StageKind::Reasoning, "deep")
            .with_fallback(StageSpec::new(StageKind::Reasoning, "lite"));
        let c = StageSpec::new(StageKind::Validation, "deep");
        assert!(a.same_stage(&b));
        assert!(!a.same_stage(&c));
    }

    #[test]
    fn test_fallback_two_cycle_rejected() {
        let stage = StageSpec::new(StageKind::Reasoning, "deep").with_fallback(
            StageSpec::new(StageKind::Reasoning, "lite")
                .with_fallback(StageSpec::new(StageKind::Reasoning, "deep")),
        );
        let err = stage.validate("t").unwrap_err();
        assert!(matches!(err, ConfigError::FallbackCycle { ref capability, .. } if capability == "deep"));
    }

    #[test]
    fn test_fallback_to_same_capability_rejected() {
        let stage = StageSpec::new(StageKind::Consensus, "panel")
            .with_fallback(StageSpec::new(StageKind::Validation, "panel"));
        assert!(stage.validate("t").is_err());
    }

    #[test]
    fn test_fallback_depth() {
        let stage = StageSpec::new(StageKind::Consensus, "panel").with_fallback(
            StageSpec::new(StageKind::Validation, "single")
                .with_fallback(StageSpec::new(StageKind::Validation, "lint")),
        );
        assert_eq!(stage.fallback_depth(), 2);
        assert!(stage.validate("t").is_ok());
    }

    #[test]
    fn test_empty_template_rejected() {
        let template = WorkflowTemplate::new("empty", vec![]);
        assert!(matches!(
            template.validate(),
            Err(ConfigError::EmptyStages { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let template = WorkflowTemplate::new(
            "t",
            vec![StageSpec::new(StageKind::Reasoning, "deep").with_timeout(Duration::ZERO)],
        );
        assert!(matches!(
            template.validate(),
            Err(ConfigError::InvalidStage { .. })
        ));
    }

    #[test]
    fn test_stage_spec_config_shape() {
        let json = r#"{"kind":"semantic_context","capability":"semantic"}"#;
        let stage: StageSpec = serde_json::from_str(json).unwrap();
        assert_eq!(stage.kind, StageKind::SemanticContext);
        assert_eq!(stage.required_capability.as_str(), "semantic");
        assert_eq!(stage.timeout(), Duration::from_secs(30));
        assert!(stage.fallback.is_none());
    }
}
