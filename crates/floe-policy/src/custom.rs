//! Custom policies: `required_tags`, `naming_convention`, `max_transforms`,
//! and the sandboxed `custom` condition kind (§4.4 "Custom policies").

use floe_types::{Severity, Violation};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::expr::{self, ModelView};
use crate::manifest::Manifest;

/// What a policy violation should mean for the overall `passed` verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Warn,
    Error,
    Block,
}

impl Action {
    fn severity(self) -> Severity {
        match self {
            Action::Warn => Severity::Warning,
            Action::Error | Action::Block => Severity::Error,
        }
    }
}

/// One configured custom policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomPolicy {
    RequiredTags { name: String, action: Action, required: Vec<String> },
    NamingConvention { name: String, action: Action, pattern: String },
    MaxTransforms { name: String, action: Action, threshold: usize },
    Custom { name: String, action: Action, condition: String },
}

pub fn evaluate_all(manifest: &Manifest, policies: &[CustomPolicy]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for policy in policies {
        violations.extend(evaluate_one(manifest, policy));
    }
    violations
}

fn evaluate_one(manifest: &Manifest, policy: &CustomPolicy) -> Vec<Violation> {
    match policy {
        CustomPolicy::RequiredTags { name, action, required } => {
            required_tags(manifest, name, *action, required)
        }
        CustomPolicy::NamingConvention { name, action, pattern } => {
            naming_convention(manifest, name, *action, pattern)
        }
        CustomPolicy::MaxTransforms { name, action, threshold } => {
            max_transforms(manifest, name, *action, *threshold)
        }
        CustomPolicy::Custom { name, action, condition } => custom(manifest, name, *action, condition),
    }
}

fn required_tags(manifest: &Manifest, policy_name: &str, action: Action, required: &[String]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (_, node) in manifest.models() {
        let missing: Vec<&String> = required.iter().filter(|t| !node.tags.contains(t)).collect();
        if !missing.is_empty() {
            let missing_str = missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            violations.push(Violation {
                error_code: "custom_required_tags".into(),
                severity: action.severity(),
                policy_type: "custom".into(),
                model_name: node.name.clone(),
                message: format!(
                    "policy \"{policy_name}\": model \"{}\" is missing required tags: {missing_str}",
                    node.name
                ),
                expected: format!("tags include {required:?}"),
                actual: format!("tags: {:?}", node.tags),
                suggestion: format!("add the missing tags to model \"{}\"", node.name),
                documentation_url: "https://docs.floe.dev/policy/custom#required-tags".into(),
            });
        }
    }
    violations
}

fn naming_convention(manifest: &Manifest, policy_name: &str, action: Action, pattern: &str) -> Vec<Violation> {
    let Ok(re) = Regex::new(pattern) else {
        return vec![Violation {
            error_code: "custom_naming_convention".into(),
            severity: Severity::Error,
            policy_type: "custom".into(),
            model_name: String::new(),
            message: format!("policy \"{policy_name}\": pattern \"{pattern}\" is not a valid regex"),
            expected: "a valid regular expression".into(),
            actual: pattern.to_string(),
            suggestion: "fix the naming_convention pattern in configuration".into(),
            documentation_url: "https://docs.floe.dev/policy/custom#naming-convention".into(),
        }];
    };

    manifest
        .models()
        .filter(|(_, node)| !re.is_match(&node.name))
        .map(|(_, node)| Violation {
            error_code: "custom_naming_convention".into(),
            severity: action.severity(),
            policy_type: "custom".into(),
            model_name: node.name.clone(),
            message: format!("policy \"{policy_name}\": model \"{}\" does not match pattern \"{pattern}\"", node.name),
            expected: format!("match \"{pattern}\""),
            actual: node.name.clone(),
            suggestion: "rename the model or adjust the configured naming_convention pattern".into(),
            documentation_url: "https://docs.floe.dev/policy/custom#naming-convention".into(),
        })
        .collect()
}

fn max_transforms(manifest: &Manifest, policy_name: &str, action: Action, threshold: usize) -> Vec<Violation> {
    let count = manifest.models().count();
    if count <= threshold {
        return Vec::new();
    }
    vec![Violation {
        error_code: "custom_max_transforms".into(),
        severity: action.severity(),
        policy_type: "custom".into(),
        model_name: String::new(),
        message: format!("policy \"{policy_name}\": manifest has {count} models, exceeding the threshold of {threshold}"),
        expected: format!("at most {threshold} models"),
        actual: format!("{count} models"),
        suggestion: "split the project or raise the configured max_transforms threshold".into(),
        documentation_url: "https://docs.floe.dev/policy/custom#max-transforms".into(),
    }]
}

fn custom(manifest: &Manifest, policy_name: &str, action: Action, condition: &str) -> Vec<Violation> {
    manifest
        .models()
        .filter_map(|(_, node)| {
            let view = ModelView { name: &node.name, tags: &node.tags, meta: &node.meta, columns: &node.columns };
            match expr::evaluate(condition, &view) {
                Ok(true) => None,
                Ok(false) => Some(Violation {
                    error_code: "custom_condition".into(),
                    severity: action.severity(),
                    policy_type: "custom".into(),
                    model_name: node.name.clone(),
                    message: format!("policy \"{policy_name}\": model \"{}\" fails condition \"{condition}\"", node.name),
                    expected: condition.to_string(),
                    actual: "condition evaluated to false".into(),
                    suggestion: "update the model to satisfy the configured condition".into(),
                    documentation_url: "https://docs.floe.dev/policy/custom#condition".into(),
                }),
                Err(err) => Some(Violation {
                    error_code: "custom_condition_error".into(),
                    severity: Severity::Warning,
                    policy_type: "custom".into(),
                    model_name: node.name.clone(),
                    message: format!(
                        "policy \"{policy_name}\": condition failed to evaluate for model \"{}\": {err}",
                        node.name
                    ),
                    expected: "condition evaluates without error".into(),
                    actual: err.to_string(),
                    suggestion: "fix the condition expression in configuration".into(),
                    documentation_url: "https://docs.floe.dev/policy/custom#condition".into(),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependsOn, Node};
    use std::collections::BTreeMap;

    fn model(name: &str, tags: &[&str]) -> Node {
        Node {
            resource_type: "model".into(),
            name: name.into(),
            depends_on: DependsOn::default(),
            meta: Default::default(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            columns: Default::default(),
        }
    }

    fn manifest_of(nodes: Vec<(&str, Node)>) -> Manifest {
        Manifest {
            nodes: nodes.into_iter().map(|(id, n)| (id.to_string(), n)).collect(),
            sources: BTreeMap::new(),
            manifest_version: "1".into(),
        }
    }

    #[test]
    fn required_tags_flags_missing() {
        let manifest = manifest_of(vec![("model.p.a", model("a", &["pii"]))]);
        let violations = required_tags(&manifest, "pii-check", Action::Error, &["pii".into(), "owner".into()]);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("owner"));
    }

    #[test]
    fn required_tags_passes_when_all_present() {
        let manifest = manifest_of(vec![("model.p.a", model("a", &["pii", "owner"]))]);
        assert!(required_tags(&manifest, "pii-check", Action::Error, &["pii".into(), "owner".into()]).is_empty());
    }

    #[test]
    fn max_transforms_flags_when_exceeded() {
        let manifest = manifest_of(vec![
            ("model.p.a", model("a", &[])),
            ("model.p.b", model("b", &[])),
            ("model.p.c", model("c", &[])),
        ]);
        let violations = max_transforms(&manifest, "size-cap", Action::Warn, 2);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Warning);
        assert!(violations[0].message.contains('3'));
    }

    #[test]
    fn custom_condition_flags_failing_models() {
        let manifest = manifest_of(vec![("model.p.a", model("a", &[]))]);
        let violations = custom(&manifest, "has-pii", Action::Error, "'pii' in model.tags");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].error_code, "custom_condition");
    }

    #[test]
    fn custom_condition_eval_error_becomes_warning() {
        let manifest = manifest_of(vec![("model.p.a", model("a", &[]))]);
        let violations = custom(&manifest, "bad-cond", Action::Error, "model.nonexistent == 'x'");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Warning);
        assert_eq!(violations[0].error_code, "custom_condition_error");
    }

    #[test]
    fn evaluate_all_runs_every_configured_policy() {
        let manifest = manifest_of(vec![("model.p.a", model("a", &[]))]);
        let policies = vec![
            CustomPolicy::RequiredTags { name: "p1".into(), action: Action::Warn, required: vec!["pii".into()] },
            CustomPolicy::MaxTransforms { name: "p2".into(), action: Action::Error, threshold: 0 },
        ];
        let violations = evaluate_all(&manifest, &policies);
        assert_eq!(violations.len(), 2);
    }
}
