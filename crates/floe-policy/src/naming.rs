//! Naming validator: model names must follow a configured convention
//! (§4.4 "Naming validator").

use floe_types::{Severity, Violation};
use regex::Regex;

use crate::manifest::Manifest;

/// How strictly the naming convention is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    Off,
    Warn,
    #[default]
    Strict,
}

/// The naming pattern a manifest is checked against.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum NamingPattern {
    Medallion,
    Kimball,
    Custom { custom_patterns: Vec<String> },
}

const MEDALLION_PREFIXES: &[&str] = &["bronze_", "silver_", "gold_"];
const KIMBALL_PREFIXES: &[&str] = &["stg_", "int_", "fct_", "dim_"];

/// Naming validator configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub level: EnforcementLevel,
    #[serde(flatten)]
    pub pattern: NamingPattern,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion }
    }
}

pub fn validate(manifest: &Manifest, config: &NamingConfig) -> Vec<Violation> {
    if config.level == EnforcementLevel::Off {
        return Vec::new();
    }

    let severity = match config.level {
        EnforcementLevel::Off => return Vec::new(),
        EnforcementLevel::Warn => Severity::Warning,
        EnforcementLevel::Strict => Severity::Error,
    };

    let compiled = match &config.pattern {
        NamingPattern::Custom { custom_patterns } => {
            let regexes: Result<Vec<Regex>, _> = custom_patterns.iter().map(|p| Regex::new(p)).collect();
            match regexes {
                Ok(r) => Some(r),
                Err(_) => {
                    return vec![invalid_config_violation()];
                }
            }
        }
        _ => None,
    };

    if matches!(&config.pattern, NamingPattern::Custom { custom_patterns } if custom_patterns.is_empty()) {
        return vec![invalid_config_violation()];
    }

    let mut violations = Vec::new();
    for (_, node) in manifest.models() {
        let matches = match &config.pattern {
            NamingPattern::Medallion => MEDALLION_PREFIXES.iter().any(|p| node.name.starts_with(p)),
            NamingPattern::Kimball => KIMBALL_PREFIXES.iter().any(|p| node.name.starts_with(p)),
            NamingPattern::Custom { .. } => {
                compiled.as_ref().unwrap().iter().any(|r| r.is_match(&node.name))
            }
        };
        if !matches {
            violations.push(naming_violation(node, &config.pattern, severity));
        }
    }
    violations
}

fn invalid_config_violation() -> Violation {
    Violation {
        error_code: "naming_config".into(),
        severity: Severity::Error,
        policy_type: "naming".into(),
        model_name: String::new(),
        message: "naming pattern \"custom\" requires at least one entry in custom_patterns".into(),
        expected: "custom_patterns: [<regex>, ...]".into(),
        actual: "custom_patterns unset or empty".into(),
        suggestion: "add one or more regex patterns to custom_patterns".into(),
        documentation_url: "https://docs.floe.dev/policy/naming".into(),
    }
}

fn naming_violation(node: &crate::manifest::Node, pattern: &NamingPattern, severity: Severity) -> Violation {
    let expected = match pattern {
        NamingPattern::Medallion => format!("prefix in {MEDALLION_PREFIXES:?}"),
        NamingPattern::Kimball => format!("prefix in {KIMBALL_PREFIXES:?}"),
        NamingPattern::Custom { custom_patterns } => format!("match one of {custom_patterns:?}"),
    };
    Violation {
        error_code: "naming".into(),
        severity,
        policy_type: "naming".into(),
        model_name: node.name.clone(),
        message: format!("model \"{}\" does not satisfy the naming convention", node.name),
        expected,
        actual: node.name.clone(),
        suggestion: "rename the model to match the configured naming convention".into(),
        documentation_url: "https://docs.floe.dev/policy/naming".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependsOn, Node};
    use std::collections::BTreeMap;

    fn model(name: &str) -> Node {
        Node {
            resource_type: "model".into(),
            name: name.into(),
            depends_on: DependsOn::default(),
            meta: Default::default(),
            tags: vec![],
            columns: Default::default(),
        }
    }

    fn manifest_with(names: &[&str]) -> Manifest {
        let mut nodes = BTreeMap::new();
        for n in names {
            nodes.insert(format!("model.p.{n}"), model(n));
        }
        Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() }
    }

    #[test]
    fn off_level_produces_no_violations() {
        let manifest = manifest_with(&["bad_name"]);
        let config = NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion };
        assert!(validate(&manifest, &config).is_empty());
    }

    #[test]
    fn medallion_accepts_bronze_prefix() {
        let manifest = manifest_with(&["bronze_orders"]);
        let config = NamingConfig { level: EnforcementLevel::Strict, pattern: NamingPattern::Medallion };
        assert!(validate(&manifest, &config).is_empty());
    }

    #[test]
    fn medallion_rejects_unprefixed_name_as_error() {
        let manifest = manifest_with(&["orders"]);
        let config = NamingConfig { level: EnforcementLevel::Strict, pattern: NamingPattern::Medallion };
        let violations = validate(&manifest, &config);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
    }

    #[test]
    fn warn_level_downgrades_severity() {
        let manifest = manifest_with(&["orders"]);
        let config = NamingConfig { level: EnforcementLevel::Warn, pattern: NamingPattern::Kimball };
        let violations = validate(&manifest, &config);
        assert_eq!(violations[0].severity, Severity::Warning);
    }

    #[test]
    fn custom_pattern_without_patterns_is_invalid_config() {
        let manifest = manifest_with(&["orders"]);
        let config = NamingConfig {
            level: EnforcementLevel::Strict,
            pattern: NamingPattern::Custom { custom_patterns: vec![] },
        };
        let violations = validate(&manifest, &config);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error_code, "naming_config");
    }

    #[test]
    fn custom_pattern_matches_supplied_regex() {
        let manifest = manifest_with(&["rpt_orders"]);
        let config = NamingConfig {
            level: EnforcementLevel::Strict,
            pattern: NamingPattern::Custom { custom_patterns: vec!["^rpt_".into()] },
        };
        assert!(validate(&manifest, &config).is_empty());
    }
}
