//! Trigger Registry: validated, immutable table of triggers and templates
//!
//! Loaded once from a declarative [`RegistryConfig`] (or built in code via
//! [`RegistryBuilder`]). Validation rejects:
//! - triggers pointing at unknown templates
//! - templates with no stages, or duplicate template ids
//! - fallback chains that revisit a capability
//! - a missing default template
//!
//! After load the registry is read-only. [`SharedRegistry`] hands out
//! `Arc` snapshots and swaps in a freshly loaded registry atomically, so
//! in-flight executions keep the snapshot they started with.

pub mod config;
pub mod template;
pub mod trigger;

pub use config::{RegistryConfig, TriggerConfig};
pub use template::{CapabilityRef, StageKind, StageSpec, WorkflowTemplate};
pub use trigger::{PredicateFn, Trigger, TriggerCondition, TriggerPredicate};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Immutable trigger/template table.
#[derive(Debug, Clone)]
pub struct Registry {
    triggers: Vec<Trigger>,
    templates: Vec<WorkflowTemplate>,
    index: HashMap<String, usize>,
    default_index: usize,
}

impl Registry {
    /// Validate a declarative source into a registry.
    pub fn load(config: RegistryConfig) -> ConfigResult<Self> {
        let mut builder = RegistryBuilder::new(config.default_template);
        for template in config.templates {
            builder = builder.template(template);
        }
        for trigger in config.triggers {
            builder = builder.trigger(trigger.into());
        }
        builder.build()
    }

    /// Read, parse and validate a registry file.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        Self::load(RegistryConfig::from_path(path)?)
    }

    pub fn builder(default_template: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(default_template)
    }

    /// Triggers in declaration order.
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn template(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.index.get(id).map(|&i| &self.templates[i])
    }

    /// The template used when no trigger matches. Always present.
    pub fn default_template(&self) -> &WorkflowTemplate {
        &self.templates[self.default_index]
    }

    pub fn templates(&self) -> impl Iterator<Item = &WorkflowTemplate> {
        self.templates.iter()
    }

    pub fn summary(&self) -> String {
        format!(
            "templates={} triggers={} default={}",
            self.templates.len(),
            self.triggers.len(),
            self.default_template().id
        )
    }
}

/// Programmatic registry construction with the same validation as `load`.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    default_template: String,
    templates: Vec<WorkflowTemplate>,
    triggers: Vec<Trigger>,
}

impl RegistryBuilder {
    pub fn new(default_template: impl Into<String>) -> Self {
        Self {
            default_template: default_template.into(),
            templates: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn template(mut self, template: WorkflowTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn build(self) -> ConfigResult<Registry> {
        let mut index = HashMap::new();
        let mut templates = Vec::with_capacity(self.templates.len());

        for mut template in self.templates {
            if index.contains_key(&template.id) {
                return Err(ConfigError::DuplicateTemplate {
                    template: template.id,
                });
            }
            template.validate()?;
            if template.domain.is_empty() {
                template.domain = template.id.clone();
            }
            index.insert(template.id.clone(), templates.len());
            templates.push(template);
        }

        let default_index =
            *index
                .get(&self.default_template)
                .ok_or_else(|| ConfigError::NoDefaultTemplate {
                    expected: self.default_template.clone(),
                })?;

        for trigger in &self.triggers {
            if !index.contains_key(&trigger.template_ref) {
                return Err(ConfigError::UnknownTemplate {
                    domain: trigger.domain.clone(),
                    template: trigger.template_ref.clone(),
                });
            }
        }

        let domains: HashSet<&str> = self.triggers.iter().map(|t| t.domain.as_str()).collect();
        info!(
            templates = templates.len(),
            triggers = self.triggers.len(),
            domains = domains.len(),
            default = %self.default_template,
            "Trigger registry loaded"
        );

        Ok(Registry {
            triggers: self.triggers,
            templates,
            index,
            default_index,
        })
    }
}

/// Process-wide handle to the current registry.
///
/// Readers clone an `Arc` snapshot; `swap` replaces the whole registry in
/// one step. A registry is never mutated in place.
#[derive(Debug)]
pub struct SharedRegistry {
    inner: RwLock<Arc<Registry>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    /// Snapshot of the registry currently in effect.
    pub fn current(&self) -> Arc<Registry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new registry and return the previous one.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        let next = Arc::new(registry);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        info!(registry = %next.summary(), "Trigger registry swapped");
        std::mem::replace(&mut *guard, next)
    }

    /// Re-read a registry file and swap it in. On error the current
    /// registry stays in effect.
    pub fn reload_from(&self, path: &Path) -> ConfigResult<Arc<Registry>> {
        let registry = Registry::from_path(path)?;
        Ok(self.swap(registry))
    }
}
