//! Task descriptions and the complexity profile derived from them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// An incoming task: opaque text plus caller-supplied hints.
///
/// Hints are kept in a `BTreeMap` so iteration order (and therefore any
/// output derived from them) never depends on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Caller-visible identifier. Not an extraction input.
    pub id: String,
    /// Free-form task text.
    pub text: String,
    /// Hints such as `environment=production` or `steps=4`.
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
}

impl TaskDescription {
    /// Create a task with a generated id and no hints.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            hints: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Look up a hint by key, ignoring key case.
    pub fn hint(&self, key: &str) -> Option<&str> {
        self.hints
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim())
    }

    /// Parse `key=value` pairs (as given on a command line) into hints.
    /// Pairs without `=` are skipped.
    pub fn with_hint_pairs<'a>(mut self, pairs: impl IntoIterator<Item = &'a str>) -> Self {
        for pair in pairs {
            if let Some((k, v)) = pair.split_once('=') {
                self.hints.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        self
    }
}

/// Severity flag of a task.
///
/// Ordered so that `max()` picks the most demanding one:
/// `Normal < Performance < Security`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Performance,
    Security,
}

impl Severity {
    /// Parse a hint value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "performance" | "perf" => Some(Self::Performance),
            "security" | "sec" => Some(Self::Security),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Performance => write!(f, "performance"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// Countable complexity signals for one task.
///
/// `Default` is the minimum profile: every count zero, no tags, normal
/// severity, not production.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComplexityProfile {
    /// Estimated number of distinct steps.
    pub step_count: u32,
    /// Estimated number of branching decisions.
    pub decision_points: u32,
    /// Number of distinct systems the task touches.
    pub affected_systems: u32,
    /// Whether the task targets a production environment.
    pub is_production: bool,
    /// Domain tags such as `architecture` or `security`.
    pub domain_tags: BTreeSet<String>,
    pub severity: Severity,
}

impl ComplexityProfile {
    /// True when every signal sits at its minimum.
    pub fn is_minimal(&self) -> bool {
        *self == Self::default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.domain_tags.contains(tag)
    }

    /// Re-derive a profile that incorporates signals surfaced by a stage.
    ///
    /// Counts take the maximum, flags are OR-ed, tags are unioned and the
    /// higher severity wins. `self` is left untouched.
    pub fn absorb(&self, signals: &SurfacedSignals) -> Self {
        let mut next = self.clone();
        if let Some(steps) = signals.step_count {
            next.step_count = next.step_count.max(steps);
        }
        if let Some(decisions) = signals.decision_points {
            next.decision_points = next.decision_points.max(decisions);
        }
        if let Some(systems) = signals.affected_systems {
            next.affected_systems = next.affected_systems.max(systems);
        }
        if let Some(production) = signals.is_production {
            next.is_production |= production;
        }
        if let Some(severity) = signals.severity {
            next.severity = next.severity.max(severity);
        }
        next.domain_tags
            .extend(signals.domain_tags.iter().map(|t| t.to_ascii_lowercase()));
        next
    }

    /// Compact one-line summary for logs.
    pub fn summary(&self) -> String {
        let tags: Vec<&str> = self.domain_tags.iter().map(String::as_str).collect();
        format!(
            "steps={} decisions={} systems={} prod={} severity={} tags=[{}]",
            self.step_count,
            self.decision_points,
            self.affected_systems,
            self.is_production,
            self.severity,
            tags.join(",")
        )
    }
}

/// New information a stage reports about the task.
///
/// Every field is optional; absent fields leave the profile unchanged
/// when absorbed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacedSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_systems: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_production: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub domain_tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl SurfacedSignals {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
