//! Signal extractor: converts task text and hints into a [`ComplexityProfile`].
//!
//! Pure keyword and structure counting. No model calls, no clock, no
//! randomness: identical text and hints always produce an identical profile.
//!
//! ```text
//! text ──┬─ enumerated items / action sentences ─┐
//!        ├─ sequencing connectives ──────────────┴─> step_count
//!        ├─ branching words ─────────────────────-> decision_points
//!        ├─ system vocabulary (distinct) ─────────-> affected_systems
//!        ├─ tag table ───────────────────────────-> domain_tags ─> severity
//!        └─ "production" / hint env=prod ─────────-> is_production
//! hints ─── steps / decision_points / affected_systems / tags / severity
//! ```

use crate::signals::profile::{ComplexityProfile, Severity, TaskDescription};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Enumerated list items at line start: `1.`, `2)`, `-`, `*`, `•`.
static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*•])\s+\S").expect("LIST_ITEM_RE regex should compile")
});

/// Connectives that introduce an additional step.
static SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:then|after that|afterwards|next|finally|subsequently)\b")
        .expect("SEQUENCE_RE regex should compile")
});

/// Words that introduce a branching decision.
static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:if|whether|unless|either|otherwise|or else|depending on|versus|vs|trade-?offs?|choose|decide)\b",
    )
    .expect("DECISION_RE regex should compile")
});

static PRODUCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:production|prod)\b").expect("PRODUCTION_RE regex should compile")
});

/// Sentence boundaries used when the text has no enumerated items.
static SENTENCE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?;\n]+").expect("SENTENCE_SPLIT_RE regex should compile")
});

/// Imperative verbs that mark a sentence as a unit of work.
const ACTION_VERBS: &[&str] = &[
    "add",
    "implement",
    "create",
    "build",
    "fix",
    "update",
    "remove",
    "delete",
    "refactor",
    "migrate",
    "rename",
    "move",
    "extract",
    "replace",
    "write",
    "test",
    "deploy",
    "configure",
    "integrate",
    "investigate",
    "optimize",
    "review",
    "design",
    "split",
    "merge",
    "upgrade",
];

/// Canonical system name → aliases. Each canonical name counts once.
const SYSTEM_VOCABULARY: &[(&str, &[&str])] = &[
    ("database", &["database", "db", "postgres", "mysql", "sqlite", "sql"]),
    ("api", &["api", "endpoint", "endpoints", "rest", "graphql", "grpc"]),
    ("cache", &["cache", "caching", "redis", "memcached"]),
    ("queue", &["queue", "kafka", "rabbitmq", "pubsub", "broker"]),
    ("frontend", &["frontend", "ui", "react", "liveview", "browser"]),
    ("backend", &["backend", "server"]),
    ("auth", &["auth", "authentication", "authorization", "oauth", "login", "sso"]),
    ("storage", &["storage", "s3", "bucket", "filesystem", "blob"]),
    ("search", &["elasticsearch", "opensearch", "search index"]),
    ("payments", &["payment", "payments", "billing", "stripe"]),
    ("notifications", &["email", "notification", "notifications", "sms", "webhook"]),
    ("ci", &["ci", "ci/cd", "github actions", "build pipeline"]),
];

/// Tag → trigger words.
const TAG_TABLE: &[(&str, &[&str])] = &[
    (
        "architecture",
        &[
            "architecture",
            "architectural",
            "redesign",
            "refactor",
            "microservice",
            "microservices",
            "module boundaries",
            "system design",
        ],
    ),
    (
        "security",
        &[
            "security",
            "vulnerability",
            "vulnerabilities",
            "cve",
            "xss",
            "csrf",
            "injection",
            "secret",
            "secrets",
            "password",
            "encrypt",
            "encryption",
            "crypto",
            "auth",
            "authentication",
            "authorization",
        ],
    ),
    (
        "performance",
        &[
            "performance",
            "latency",
            "slow",
            "throughput",
            "optimize",
            "optimise",
            "bottleneck",
            "memory leak",
            "n+1",
        ],
    ),
    (
        "database",
        &["database", "migration", "migrations", "schema", "query", "queries", "index"],
    ),
    (
        "frontend",
        &["frontend", "ui", "css", "component", "components", "liveview", "layout"],
    ),
    (
        "infrastructure",
        &["infrastructure", "deploy", "deployment", "kubernetes", "docker", "terraform", "helm"],
    ),
    ("testing", &["test", "tests", "testing", "coverage", "flaky"]),
    (
        "debugging",
        &["bug", "debug", "crash", "crashes", "regression", "failing", "stack trace"],
    ),
];

/// Build a case-insensitive whole-word alternation over literal aliases.
fn word_set(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    // `\b` fails next to aliases such as `n+1`; match on non-word neighbours.
    Regex::new(&format!(r"(?i)(?:^|\W)(?:{alternation})(?:$|\W)"))
        .expect("word set regex should compile")
}

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| word_set(ACTION_VERBS));

static SYSTEM_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SYSTEM_VOCABULARY
        .iter()
        .map(|(name, aliases)| (*name, word_set(aliases)))
        .collect()
});

static TAG_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TAG_TABLE
        .iter()
        .map(|(tag, words)| (*tag, word_set(words)))
        .collect()
});

/// Stateless signal extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Derive a profile from a task. Never fails; empty text yields the
    /// minimum profile unless hints say otherwise.
    pub fn extract(&self, task: &TaskDescription) -> ComplexityProfile {
        let text = task.text.as_str();

        let mut profile = ComplexityProfile {
            step_count: count_steps(text),
            decision_points: DECISION_RE.find_iter(text).count() as u32,
            affected_systems: SYSTEM_RES.iter().filter(|(_, re)| re.is_match(text)).count()
                as u32,
            is_production: PRODUCTION_RE.is_match(text),
            domain_tags: TAG_RES
                .iter()
                .filter(|(_, re)| re.is_match(text))
                .map(|(tag, _)| (*tag).to_string())
                .collect(),
            severity: Severity::Normal,
        };

        apply_hints(&mut profile, task);
        profile.severity = profile.severity.max(severity_from_tags(&profile.domain_tags));
        profile
    }
}

/// Convenience wrapper around [`SignalExtractor::extract`].
pub fn extract(task: &TaskDescription) -> ComplexityProfile {
    SignalExtractor::new().extract(task)
}

fn count_steps(text: &str) -> u32 {
    let connectives = SEQUENCE_RE.find_iter(text).count() as u32;
    let items = LIST_ITEM_RE.find_iter(text).count() as u32;
    let base = if items > 0 {
        items
    } else {
        SENTENCE_SPLIT_RE
            .split(text)
            .filter(|sentence| ACTION_RE.is_match(sentence))
            .count() as u32
    };
    if base == 0 {
        // Connectives with nothing to sequence are not steps.
        return 0;
    }
    base + connectives
}

fn severity_from_tags(tags: &BTreeSet<String>) -> Severity {
    if tags.contains("security") {
        Severity::Security
    } else if tags.contains("performance") {
        Severity::Performance
    } else {
        Severity::Normal
    }
}

fn parse_count(task: &TaskDescription, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|k| task.hint(k))
        .and_then(|v| v.parse::<u32>().ok())
}

fn apply_hints(profile: &mut ComplexityProfile, task: &TaskDescription) {
    if let Some(steps) = parse_count(task, &["steps", "step_count"]) {
        profile.step_count = profile.step_count.max(steps);
    }
    if let Some(decisions) = parse_count(task, &["decision_points", "decisions"]) {
        profile.decision_points = profile.decision_points.max(decisions);
    }
    if let Some(systems) = parse_count(task, &["affected_systems", "systems"]) {
        profile.affected_systems = profile.affected_systems.max(systems);
    }

    if let Some(env) = task.hint("environment").or_else(|| task.hint("env")) {
        if matches!(env.to_ascii_lowercase().as_str(), "production" | "prod") {
            profile.is_production = true;
        }
    }

    if let Some(tags) = task.hint("tags") {
        profile.domain_tags.extend(
            tags.split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty()),
        );
    }

    if let Some(severity) = task.hint("severity").and_then(Severity::parse) {
        profile.severity = profile.severity.max(severity);
    }
}
