//! The policy enforcement engine the `policy_compliance` gate runs (§4.4).
//!
//! Evaluates a compiled manifest against a naming convention, the built-in
//! semantic checks (ref/source resolution, cycle detection), and a list of
//! configured custom policies, producing one [`floe_types::PolicyResult`].
//!
//! # Example
//!
//! ```
//! use floe_policy::{PolicyEngine, PolicyEngineConfig};
//! use floe_policy::naming::{EnforcementLevel, NamingConfig, NamingPattern};
//! use floe_policy::manifest::Manifest;
//!
//! let manifest = Manifest::default();
//! let engine = PolicyEngine::new(PolicyEngineConfig {
//!     naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
//!     custom_policies: vec![],
//!     strict: true,
//! });
//! let result = engine.evaluate(&manifest);
//! assert!(result.passed);
//! ```

pub mod custom;
pub mod expr;
pub mod manifest;
pub mod naming;
pub mod semantic;

use std::time::Instant;

use floe_types::{PolicyResult, Severity};

use custom::CustomPolicy;
use manifest::Manifest;
use naming::NamingConfig;

/// Configuration for one policy engine run.
#[derive(Debug, Clone)]
pub struct PolicyEngineConfig {
    pub naming: NamingConfig,
    pub custom_policies: Vec<CustomPolicy>,
    /// Whether `error`-severity violations fail the gate (§4.4 "Policy
    /// result"). `block`-action custom violations always fail regardless.
    pub strict: bool,
}

pub struct PolicyEngine {
    config: PolicyEngineConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyEngineConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, manifest: &Manifest) -> PolicyResult {
        let started = Instant::now();

        let mut violations = naming::validate(manifest, &self.config.naming);
        violations.extend(semantic::validate(manifest));
        violations.extend(custom::evaluate_all(manifest, &self.config.custom_policies));

        let has_error = violations.iter().any(|v| v.severity == Severity::Error);

        // A Block-action policy fails the gate only if it itself produced a
        // violation, not merely because one is configured (§4.4 "Custom
        // policies"): re-evaluate just the Block-action policies to find out.
        let block_policies: Vec<CustomPolicy> =
            self.config.custom_policies.iter().filter(|p| policy_action_is_block(p)).cloned().collect();
        let has_block = !custom::evaluate_all(manifest, &block_policies).is_empty();

        let passed = !(self.config.strict && has_error) && !has_block;

        PolicyResult {
            passed,
            violations,
            manifest_version: manifest.manifest_version.clone(),
            enforcement_level: if self.config.strict { "strict".into() } else { "warn".into() },
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn policy_action_is_block(policy: &CustomPolicy) -> bool {
    matches!(
        policy,
        CustomPolicy::RequiredTags { action: custom::Action::Block, .. }
            | CustomPolicy::NamingConvention { action: custom::Action::Block, .. }
            | CustomPolicy::MaxTransforms { action: custom::Action::Block, .. }
            | CustomPolicy::Custom { action: custom::Action::Block, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DependsOn, Node};
    use crate::naming::{EnforcementLevel, NamingPattern};
    use std::collections::BTreeMap;

    fn model(name: &str, deps: &[&str]) -> Node {
        Node {
            resource_type: "model".into(),
            name: name.into(),
            depends_on: DependsOn { nodes: deps.iter().map(|s| s.to_string()).collect() },
            meta: Default::default(),
            tags: vec![],
            columns: Default::default(),
        }
    }

    #[test]
    fn passes_when_no_violations() {
        let manifest = Manifest::default();
        let engine = PolicyEngine::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![],
            strict: true,
        });
        let result = engine.evaluate(&manifest);
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn fails_on_cycle_under_strict_enforcement() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &["model.p.b"]));
        nodes.insert("model.p.b".to_string(), model("b", &["model.p.a"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };

        let engine = PolicyEngine::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![],
            strict: true,
        });
        let result = engine.evaluate(&manifest);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].error_code, "FLOE-E302");
    }

    #[test]
    fn non_strict_enforcement_does_not_fail_on_error_severity() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &["model.p.missing"]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };

        let engine = PolicyEngine::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![],
            strict: false,
        });
        let result = engine.evaluate(&manifest);
        assert!(result.passed);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn block_action_fails_regardless_of_strict_setting() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &[]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };

        let engine = PolicyEngine::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![CustomPolicy::RequiredTags {
                name: "must-tag".into(),
                action: custom::Action::Block,
                required: vec!["pii".into()],
            }],
            strict: false,
        });
        let result = engine.evaluate(&manifest);
        assert!(!result.passed);
    }

    #[test]
    fn non_firing_block_policy_alongside_firing_warn_policy_still_passes() {
        let mut nodes = BTreeMap::new();
        nodes.insert("model.p.a".to_string(), model("a", &[]));
        let manifest = Manifest { nodes, sources: BTreeMap::new(), manifest_version: "1".into() };

        let engine = PolicyEngine::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![
                // Warn-action policy that fires (model has no tags).
                CustomPolicy::RequiredTags {
                    name: "should-warn".into(),
                    action: custom::Action::Warn,
                    required: vec!["pii".into()],
                },
                // Block-action policy that does not fire (threshold not exceeded).
                CustomPolicy::MaxTransforms { name: "should-not-block".into(), action: custom::Action::Block, threshold: 10 },
            ],
            strict: false,
        });
        let result = engine.evaluate(&manifest);
        assert!(result.passed);
        assert_eq!(result.violations.len(), 1);
    }
}
