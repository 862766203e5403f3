//! Trigger rules: pure predicates over a complexity profile.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::signals::{ComplexityProfile, Severity};

/// Declarative threshold predicate.
///
/// Every clause that is present must hold. A condition with no clauses
/// never matches, so an empty `when` table cannot silently capture every
/// task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_decision_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_affected_systems: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// At least one of these tags must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_tags: Vec<String>,
    /// All of these tags must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_tags: Vec<String>,
}

impl TriggerCondition {
    pub fn min_steps(mut self, n: u32) -> Self {
        self.min_steps = Some(n);
        self
    }

    pub fn min_decision_points(mut self, n: u32) -> Self {
        self.min_decision_points = Some(n);
        self
    }

    pub fn min_affected_systems(mut self, n: u32) -> Self {
        self.min_affected_systems = Some(n);
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = Some(production);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn any_tag(mut self, tag: impl Into<String>) -> Self {
        self.any_tags.push(tag.into());
        self
    }

    pub fn all_tag(mut self, tag: impl Into<String>) -> Self {
        self.all_tags.push(tag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, profile: &ComplexityProfile) -> bool {
        if self.is_empty() {
            return false;
        }
        let at_least = |min: Option<u32>, actual: u32| min.map_or(true, |m| actual >= m);

        at_least(self.min_steps, profile.step_count)
            && at_least(self.min_decision_points, profile.decision_points)
            && at_least(self.min_affected_systems, profile.affected_systems)
            && self.production.map_or(true, |p| profile.is_production == p)
            && self.severity.map_or(true, |s| profile.severity == s)
            && (self.any_tags.is_empty()
                || self
                    .any_tags
                    .iter()
                    .any(|t| profile.has_tag(&t.to_ascii_lowercase())))
            && self
                .all_tags
                .iter()
                .all(|t| profile.has_tag(&t.to_ascii_lowercase()))
    }
}

/// Custom predicate function. Must be pure: no side effects, no hidden state.
pub type PredicateFn = dyn Fn(&ComplexityProfile) -> bool + Send + Sync;

/// How a trigger decides whether it matches.
#[derive(Clone)]
pub enum TriggerPredicate {
    Condition(TriggerCondition),
    Custom(Arc<PredicateFn>),
}

impl TriggerPredicate {
    pub fn matches(&self, profile: &ComplexityProfile) -> bool {
        match self {
            Self::Condition(condition) => condition.matches(profile),
            Self::Custom(f) => f(profile),
        }
    }
}

impl std::fmt::Debug for TriggerPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Condition(condition) => f.debug_tuple("Condition").field(condition).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// A named rule mapping a complexity predicate to a candidate template.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub domain: String,
    pub predicate: TriggerPredicate,
    pub priority: i32,
    pub template_ref: String,
}

impl Trigger {
    pub fn new(
        domain: impl Into<String>,
        priority: i32,
        template_ref: impl Into<String>,
        condition: TriggerCondition,
    ) -> Self {
        Self {
            domain: domain.into(),
            predicate: TriggerPredicate::Condition(condition),
            priority,
            template_ref: template_ref.into(),
        }
    }

    pub fn custom<F>(
        domain: impl Into<String>,
        priority: i32,
        template_ref: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&ComplexityProfile) -> bool + Send + Sync + 'static,
    {
        Self {
            domain: domain.into(),
            predicate: TriggerPredicate::Custom(Arc::new(predicate)),
            priority,
            template_ref: template_ref.into(),
        }
    }

    pub fn matches(&self, profile: &ComplexityProfile) -> bool {
        self.predicate.matches(profile)
    }
}
