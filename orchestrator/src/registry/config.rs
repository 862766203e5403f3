//! Declarative registry source (TOML, YAML or JSON).
//!
//! ```toml
//! default_template = "quick"
//!
//! [[templates]]
//! id = "quick"
//! max_escalations = 2
//! [[templates.stages]]
//! kind = "semantic_context"
//! capability = "semantic"
//! timeout_ms = 5000
//!
//! [[triggers]]
//! domain = "architecture"
//! priority = 10
//! template = "deep"
//! [triggers.when]
//! min_decision_points = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::registry::template::WorkflowTemplate;
use crate::registry::trigger::{Trigger, TriggerCondition};

/// One trigger row in the config source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub domain: String,
    #[serde(default)]
    pub priority: i32,
    pub template: String,
    pub when: TriggerCondition,
}

impl From<TriggerConfig> for Trigger {
    fn from(config: TriggerConfig) -> Self {
        Trigger::new(config.domain, config.priority, config.template, config.when)
    }
}

/// The full declarative registry definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub default_template: String,
    #[serde(default)]
    pub templates: Vec<WorkflowTemplate>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

impl RegistryConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "toml".to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "yaml".to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            format: "json".to_string(),
            message: e.to_string(),
        })
    }

    /// Read a config file, picking the format from its extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let parse: fn(&str) -> ConfigResult<Self> = match extension.as_deref() {
            Some("toml") => Self::from_toml_str,
            Some("yaml") | Some("yml") => Self::from_yaml_str,
            Some("json") => Self::from_json_str,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = text.len(), "Read registry config");
        parse(&text)
    }
}
