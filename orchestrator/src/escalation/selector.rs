//! Workflow Selector: resolves matched triggers into one template.
//!
//! ```text
//! matches ─┬─ empty ───────────────────────────────> default template
//!          ├─ one top-priority template ────────────> that template
//!          └─ several top-priority templates ───────> merged template
//!               stages: union in first-occurrence order,
//!               dedup on (kind, capability)
//!               max_escalations: max of the merged templates
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{Registry, StageSpec, Trigger, WorkflowTemplate};

/// Result of template selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub template: WorkflowTemplate,
    /// Domains of the top-priority triggers that produced `template`.
    pub matched_domains: Vec<String>,
    /// Priority of those triggers; `None` when the default was used.
    pub priority: Option<i32>,
    /// Whether several templates were merged.
    pub merged: bool,
}

impl Selection {
    pub fn is_default(&self) -> bool {
        self.priority.is_none()
    }
}

/// Append stages that are not already present (same kind and capability).
/// Returns how many stages were appended.
pub fn append_missing(plan: &mut Vec<StageSpec>, stages: &[StageSpec]) -> usize {
    let mut added = 0;
    for stage in stages {
        if !plan.iter().any(|s| s.same_stage(stage)) {
            plan.push(stage.clone());
            added += 1;
        }
    }
    added
}

/// Select the template to run for an ordered match list (as produced by
/// [`evaluate`](crate::escalation::evaluate)). Never fails.
pub fn select(matches: &[&Trigger], registry: &Registry) -> Selection {
    let Some(top) = matches.first().map(|t| t.priority) else {
        return Selection {
            template: registry.default_template().clone(),
            matched_domains: Vec::new(),
            priority: None,
            merged: false,
        };
    };

    let leaders: Vec<&Trigger> = matches
        .iter()
        .copied()
        .take_while(|t| t.priority == top)
        .collect();

    let mut matched_domains: Vec<String> = Vec::new();
    let mut template_ids: Vec<&str> = Vec::new();
    for trigger in &leaders {
        if !matched_domains.contains(&trigger.domain) {
            matched_domains.push(trigger.domain.clone());
        }
        if !template_ids.contains(&trigger.template_ref.as_str()) {
            template_ids.push(trigger.template_ref.as_str());
        }
    }

    let templates: Vec<&WorkflowTemplate> = template_ids
        .iter()
        .filter_map(|id| registry.template(id))
        .collect();

    let template = match templates.as_slice() {
        [] => registry.default_template().clone(),
        [only] => (*only).clone(),
        several => merge(several),
    };
    let merged = templates.len() > 1;

    debug!(
        template = %template.id,
        priority = top,
        domains = ?matched_domains,
        merged,
        "Workflow template selected"
    );

    Selection {
        template,
        matched_domains,
        priority: Some(top),
        merged,
    }
}

fn merge(templates: &[&WorkflowTemplate]) -> WorkflowTemplate {
    let mut stages = Vec::new();
    for template in templates {
        append_missing(&mut stages, &template.stages);
    }
    WorkflowTemplate {
        id: templates
            .iter()
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
            .join("+"),
        domain: templates
            .iter()
            .map(|t| t.domain.as_str())
            .collect::<Vec<_>>()
            .join("+"),
        stages,
        max_escalations: templates
            .iter()
            .map(|t| t.max_escalations)
            .max()
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::evaluator::evaluate;
    use crate::registry::{StageKind, TriggerCondition};
    use crate::signals::ComplexityProfile;

    fn s(kind: StageKind, cap: &str) -> StageSpec {
        StageSpec::new(kind, cap)
    }

    fn registry() -> Registry {
        let s1 = s(StageKind::SemanticContext, "semantic");
        let s2 = s(StageKind::Reasoning, "reasoning");
        let s3 = s(StageKind::Consensus, "panel");
        Registry::builder("default")
            .template(WorkflowTemplate::new("default", vec![s1.clone()]))
            .template(
                WorkflowTemplate::new("A", vec![s1.clone(), s2.clone()]).with_max_escalations(1),
            )
            .template(WorkflowTemplate::new("B", vec![s2, s3]).with_max_escalations(3))
            .trigger(Trigger::new(
                "architecture",
                10,
                "A",
                TriggerCondition::default().min_decision_points(3),
            ))
            .trigger(Trigger::new(
                "security",
                10,
                "B",
                TriggerCondition::default().any_tag("security"),
            ))
            .trigger(Trigger::new(
                "steps",
                1,
                "B",
                TriggerCondition::default().min_steps(3),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_no_match_selects_default() {
        let reg = registry();
        let selection = select(&[], &reg);
        assert!(selection.is_default());
        assert_eq!(selection.template.id, "default");
        assert!(!selection.merged);
    }

    #[test]
    fn test_single_top_match_selects_its_template() {
        let reg = registry();
        let profile = ComplexityProfile {
            decision_points: 3,
            step_count: 5,
            ..Default::default()
        };
        let matches = evaluate(&reg, &profile);
        let selection = select(&matches, &reg);
        assert_eq!(selection.template, *reg.template("A").unwrap());
        assert_eq!(selection.matched_domains, vec!["architecture"]);
        assert_eq!(selection.priority, Some(10));
    }

    #[test]
    fn test_equal_priority_templates_merge() {
        let reg = registry();
        let mut profile = ComplexityProfile {
            decision_points: 3,
            ..Default::default()
        };
        profile.domain_tags.insert("security".into());
        let matches = evaluate(&reg, &profile);
        let selection = select(&matches, &reg);

        assert!(selection.merged);
        assert_eq!(selection.template.id, "A+B");
        let caps: Vec<&str> = selection
            .template
            .stages
            .iter()
            .map(|st| st.required_capability.as_str())
            .collect();
        assert_eq!(caps, vec!["semantic", "reasoning", "panel"]);
        assert_eq!(selection.template.max_escalations, 3);
        assert_eq!(selection.matched_domains, vec!["architecture", "security"]);
    }

    #[test]
    fn test_same_template_from_two_triggers_is_not_merged() {
        let reg = Registry::builder("default")
            .template(WorkflowTemplate::new(
                "default",
                vec![s(StageKind::Validation, "lint")],
            ))
            .trigger(Trigger::new("x", 3, "default", TriggerCondition::default().min_steps(1)))
            .trigger(Trigger::new("y", 3, "default", TriggerCondition::default().min_steps(1)))
            .build()
            .unwrap();
        let profile = ComplexityProfile {
            step_count: 1,
            ..Default::default()
        };
        let matches = evaluate(&reg, &profile);
        let selection = select(&matches, &reg);
        assert!(!selection.merged);
        assert!(!selection.is_default());
        assert_eq!(selection.template.id, "default");
    }

    #[test]
    fn test_append_missing_dedups() {
        let mut plan = vec![s(StageKind::Reasoning, "r")];
        let added = append_missing(
            &mut plan,
            &[
                s(StageKind::Reasoning, "r").with_timeout(std::time::Duration::from_secs(1)),
                s(StageKind::Validation, "r"),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(plan.len(), 2);
    }
}
