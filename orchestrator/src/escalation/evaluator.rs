//! Trigger Evaluator: deterministic matching of a profile against the registry.

use crate::registry::{Registry, Trigger};
use crate::signals::ComplexityProfile;

/// Evaluate every trigger and return the matches ordered by
/// `(priority desc, domain asc)`.
///
/// The sort is stable, so triggers equal on both keys keep their
/// declaration order. No matches is a valid result.
pub fn evaluate<'r>(registry: &'r Registry, profile: &ComplexityProfile) -> Vec<&'r Trigger> {
    let mut matches: Vec<&Trigger> = registry
        .triggers()
        .iter()
        .filter(|t| t.matches(profile))
        .collect();
    matches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.domain.cmp(&b.domain))
    });
    matches
}

/// Highest priority among matches, if any.
pub fn top_priority(matches: &[&Trigger]) -> Option<i32> {
    matches.first().map(|t| t.priority)
}
