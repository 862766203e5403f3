//! Error taxonomy
//!
//! | Error                      | Scope        | Recovery                          |
//! |----------------------------|--------------|-----------------------------------|
//! | `ConfigError`              | process      | fatal at load, fix and reload     |
//! | `CapabilityUnavailable`    | one task     | task → Failed                     |
//! | `StageTimeout`             | one task     | same path as CapabilityUnavailable |
//! | `EscalationLimitExceeded`  | one task     | task → Failed, never looped       |
//! | `TaskTimeout`              | one task     | task → Failed                     |
//! | `Cancelled`                | one task     | terminal, distinct from Failed    |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registry loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The registry failed validation or could not be read.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A trigger points at a template id that does not exist
    #[error("Trigger '{domain}' references unknown template '{template}'")]
    UnknownTemplate { domain: String, template: String },

    /// A template has no stages
    #[error("Template '{template}' has no stages")]
    EmptyStages { template: String },

    /// A fallback chain revisits a capability
    #[error("Template '{template}': fallback chain cycles back to capability '{capability}'")]
    FallbackCycle { template: String, capability: String },

    /// Two templates share an id
    #[error("Template '{template}' is defined more than once")]
    DuplicateTemplate { template: String },

    /// The mandatory default template is missing
    #[error("Registry has no default template (expected '{expected}')")]
    NoDefaultTemplate { expected: String },

    /// A stage definition is malformed
    #[error("Template '{template}': invalid stage: {message}")]
    InvalidStage { template: String, message: String },

    /// Config text could not be parsed
    #[error("Failed to parse {format} registry config: {message}")]
    Parse { format: String, message: String },

    /// Unknown file extension
    #[error("Unsupported registry config format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// Config file could not be read
    #[error("Failed to read registry config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Whether this is the missing-default case.
    pub fn is_missing_default(&self) -> bool {
        matches!(self, Self::NoDefaultTemplate { .. })
    }
}

/// Why a task ended in a non-success terminal state.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("capability '{capability}' unavailable: {detail}")]
    CapabilityUnavailable { capability: String, detail: String },

    #[error("capability '{capability}' timed out")]
    StageTimeout { capability: String },

    #[error("escalation limit {limit} reached while [{}] still demanded escalation", .domains.join(", "))]
    EscalationLimitExceeded { limit: u32, domains: Vec<String> },

    #[error("task exceeded its {after_ms}ms budget")]
    TaskTimeout { after_ms: u64 },

    #[error("cancelled by caller")]
    Cancelled,
}

impl FailureReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable { .. } => "capability_unavailable",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::EscalationLimitExceeded { .. } => "escalation_limit_exceeded",
            Self::TaskTimeout { .. } => "task_timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_codes() {
        let reason = FailureReason::CapabilityUnavailable {
            capability: "reasoning".into(),
            detail: "503".into(),
        };
        assert_eq!(reason.code(), "capability_unavailable");
        assert!(!reason.is_cancellation());
        assert!(FailureReason::Cancelled.is_cancellation());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::EscalationLimitExceeded {
            limit: 1,
            domains: vec!["security".into()],
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"code\":\"escalation_limit_exceeded\""), "JSON: {json}");

        let roundtrip: FailureReason = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, reason);

        let display = format!("{reason}");
        assert!(display.contains("[security]"), "Display: {display}");
    }

    #[test]
    fn test_missing_default_helper() {
        let err = ConfigError::NoDefaultTemplate {
            expected: "default".into(),
        };
        assert!(err.is_missing_default());
        assert!(err.to_string().contains("default"));
    }
}
