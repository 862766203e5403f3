//! Integration tests for registry loading
//!
//! Loads registries from real TOML/YAML files and checks every validation
//! failure surfaces as a ConfigError at load time.

use std::io::Write;
use std::sync::Arc;

use orchestrator::{
    ConfigError, Registry, RegistryConfig, SharedRegistry, StageKind, StageSpec, WorkflowTemplate,
};

const TOML_REGISTRY: &str = r#"
default_template = "quick"

[[templates]]
id = "quick"
max_escalations = 1
[[templates.stages]]
kind = "semantic_context"
capability = "semantic"
timeout_ms = 5000

[[templates]]
id = "deep"
domain = "architecture"
max_escalations = 2
[[templates.stages]]
kind = "semantic_context"
capability = "semantic"
[[templates.stages]]
kind = "reasoning"
capability = "reasoning"
[templates.stages.fallback]
kind = "reasoning"
capability = "reasoning-lite"

[[triggers]]
domain = "architecture"
priority = 10
template = "deep"
[triggers.when]
min_decision_points = 3

[[triggers]]
domain = "production"
priority = 5
template = "deep"
[triggers.when]
production = true
min_affected_systems = 2
"#;

const YAML_REGISTRY: &str = r#"
default_template: quick
templates:
  - id: quick
    stages:
      - kind: semantic_context
        capability: semantic
  - id: security
    max_escalations: 1
    stages:
      - kind: reasoning
        capability: reasoning
      - kind: consensus
        capability: panel
        timeout_ms: 60000
triggers:
  - domain: security
    priority: 20
    template: security
    when:
      any_tags: [security]
"#;

fn write_temp(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_toml_file() {
    let file = write_temp(TOML_REGISTRY, ".toml");
    let registry = Registry::from_path(file.path()).unwrap();

    assert_eq!(registry.default_template().id, "quick");
    assert_eq!(registry.triggers().len(), 2);
    let deep = registry.template("deep").unwrap();
    assert_eq!(deep.max_escalations, 2);
    assert_eq!(deep.stages[1].fallback_depth(), 1);
    assert_eq!(deep.stages[0].timeout_ms, 30_000);
    assert_eq!(registry.default_template().stages[0].timeout_ms, 5_000);
}

#[test]
fn test_load_yaml_file() {
    let file = write_temp(YAML_REGISTRY, ".yaml");
    let registry = Registry::from_path(file.path()).unwrap();

    let security = registry.template("security").unwrap();
    assert_eq!(security.domain, "security");
    assert_eq!(security.stages[1].kind, StageKind::Consensus);
    assert_eq!(registry.triggers()[0].priority, 20);
}

#[test]
fn test_unsupported_extension() {
    let file = write_temp(TOML_REGISTRY, ".ini");
    assert!(matches!(
        Registry::from_path(file.path()),
        Err(ConfigError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Registry::from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_fallback_two_cycle_rejected() {
    // reasoning → reasoning-lite → reasoning
    let cyclic = StageSpec::new(StageKind::Reasoning, "reasoning").with_fallback(
        StageSpec::new(StageKind::Reasoning, "reasoning-lite")
            .with_fallback(StageSpec::new(StageKind::Reasoning, "reasoning")),
    );
    let err = Registry::builder("quick")
        .template(WorkflowTemplate::new("quick", vec![cyclic]))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::FallbackCycle { ref capability, .. } if capability == "reasoning"
    ));
}

#[test]
fn test_unknown_template_ref_rejected() {
    let text = TOML_REGISTRY.replace("template = \"deep\"", "template = \"missing\"");
    let err = Registry::load(RegistryConfig::from_toml_str(&text).unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownTemplate { .. }));
}

#[test]
fn test_missing_default_template_rejected() {
    let text = TOML_REGISTRY.replace("default_template = \"quick\"", "default_template = \"none\"");
    let err = Registry::load(RegistryConfig::from_toml_str(&text).unwrap()).unwrap_err();
    assert!(err.is_missing_default());
}

#[test]
fn test_empty_stages_rejected() {
    let err = Registry::builder("quick")
        .template(WorkflowTemplate::new("quick", vec![]))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyStages { .. }));
}

#[test]
fn test_unknown_condition_field_is_parse_error() {
    let text = TOML_REGISTRY.replace("min_decision_points = 3", "min_decisions = 3");
    assert!(matches!(
        RegistryConfig::from_toml_str(&text),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_reload_swaps_atomically_and_keeps_old_on_error() {
    let toml = write_temp(TOML_REGISTRY, ".toml");
    let yaml = write_temp(YAML_REGISTRY, ".yaml");
    let shared = Arc::new(SharedRegistry::new(Registry::from_path(toml.path()).unwrap()));

    let before = shared.current();
    shared.reload_from(yaml.path()).unwrap();
    let after = shared.current();

    // Snapshots taken before the swap are unchanged.
    assert!(before.template("deep").is_some());
    assert!(after.template("deep").is_none());
    assert!(after.template("security").is_some());

    let broken = write_temp("default_template = ", ".toml");
    assert!(shared.reload_from(broken.path()).is_err());
    assert!(shared.current().template("security").is_some());
}
