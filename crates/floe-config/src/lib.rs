//! Operational configuration loading: a layered-struct pattern with nested
//! `#[serde(default)]` sections, a `load_from_file`/`load_from_workspace`
//! pair, and a `validate()` pass that rejects self-contradictory config
//! before the Controller ever sees it.
//!
//! # Example
//!
//! ```
//! use floe_config::FloeConfig;
//!
//! let toml = r#"
//! [[promotion_chain.environments]]
//! name = "dev"
//! gates = []
//!
//! [[promotion_chain.environments]]
//! name = "staging"
//! gates = ["tests"]
//! "#;
//! let config: FloeConfig = toml::from_str(toml).unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.promotion_chain.environments.len(), 2);
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use floe_duration::{deserialize_duration, serialize_duration};
use floe_policy::naming::NamingConfig;
use floe_retry::RetryPolicy;
use floe_types::PromotionChain;
use serde::{Deserialize, Serialize};

/// Gate runner fan-out and per-gate timeout (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_fanout")]
    pub max_concurrent: usize,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    #[serde(default = "default_gate_timeout")]
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_concurrent: default_gate_fanout(), timeout: default_gate_timeout() }
    }
}

fn default_gate_fanout() -> usize {
    4
}

fn default_gate_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Signature verification trust configuration (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignatureConfig {
    /// Glob-style trusted-signer patterns, e.g. `repo:acme/*:ref:refs/heads/main`.
    #[serde(default)]
    pub trusted_signers: Vec<String>,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    #[serde(default = "default_sign_lock_timeout")]
    pub lock_timeout: Duration,
    /// Base URL of the signature transparency service; absent means no
    /// external oracle is configured and every artifact verifies as unsigned.
    #[serde(default)]
    pub oracle_url: Option<String>,
}

/// OCI registry connection settings (§6 "Artifact references").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub repository: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { base_url: "https://registry.example.com".into(), repository: "floe/artifacts".into() }
    }
}

fn default_sign_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Lock manager defaults (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDefaults {
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    #[serde(default = "default_lock_ttl")]
    pub default_ttl: Duration,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self { default_ttl: default_lock_ttl() }
    }
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Retry tuning overrides; defaults come from [`floe_retry::RetryPolicy`]
/// presets and only need overriding for unusual deployments.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub latest_pointer: Option<RetryPolicy>,
    #[serde(default)]
    pub webhook: Option<RetryPolicy>,
    #[serde(default)]
    pub registry_transient: Option<RetryPolicy>,
}

/// Naming policy config, re-exported from `floe-policy` for a single place
/// to configure the `policy_compliance` gate's naming validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub custom: Vec<floe_policy::custom::CustomPolicy>,
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            naming: NamingConfig {
                level: floe_policy::naming::EnforcementLevel::Off,
                pattern: floe_policy::naming::NamingPattern::Medallion,
            },
            custom: Vec::new(),
            strict: default_strict(),
        }
    }
}

/// The full operational configuration loaded from `floe.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FloeConfig {
    #[serde(default)]
    pub promotion_chain: PromotionChain,
    /// `None` means no remote registry is configured; the CLI falls back to
    /// an in-memory adapter for offline/`doctor` use.
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default)]
    pub lock: LockDefaults,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub webhooks: Vec<floe_types::WebhookConfig>,
    /// `strict_ring3` (§7 Open Question resolved): when true, Ring-3
    /// degraded-success warnings escalate to a hard failure instead of
    /// being returned as `PromotionRecord.warnings`.
    #[serde(default)]
    pub strict_ring3: bool,
}

impl FloeConfig {
    /// Search for `floe.toml` in `workspace_root`; `Ok(None)` if absent.
    pub fn load_from_workspace(workspace_root: &Path) -> Result<Option<Self>> {
        let path = workspace_root.join("floe.toml");
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: FloeConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.promotion_chain.environments.is_empty() {
            bail!("promotion_chain.environments must not be empty");
        }
        let mut seen = std::collections::BTreeSet::new();
        for env in &self.promotion_chain.environments {
            if env.name.is_empty() {
                bail!("promotion_chain environment name must not be empty");
            }
            if !seen.insert(env.name.as_str()) {
                bail!("duplicate environment name in promotion_chain: {}", env.name);
            }
            if let Some(from) = &env.separation_of_duties_from {
                if self.promotion_chain.get(from).is_none() {
                    bail!(
                        "environment \"{}\" declares separation_of_duties_from \"{}\", which is not in the chain",
                        env.name,
                        from
                    );
                }
            }
        }
        if self.gates.max_concurrent == 0 {
            bail!("gates.max_concurrent must be greater than 0");
        }
        if self.gates.timeout.is_zero() {
            bail!("gates.timeout must be greater than 0");
        }
        if self.lock.default_ttl.is_zero() {
            bail!("lock.default_ttl must be greater than 0");
        }
        if let NamingPatternKind::Custom = naming_pattern_kind(&self.policy.naming) {
            if naming_pattern_is_empty(&self.policy.naming) {
                bail!("policy.naming pattern \"custom\" requires at least one custom_patterns entry");
            }
        }
        Ok(())
    }
}

enum NamingPatternKind {
    Custom,
    Other,
}

fn naming_pattern_kind(config: &NamingConfig) -> NamingPatternKind {
    match &config.pattern {
        floe_policy::naming::NamingPattern::Custom { .. } => NamingPatternKind::Custom,
        _ => NamingPatternKind::Other,
    }
}

fn naming_pattern_is_empty(config: &NamingConfig) -> bool {
    matches!(&config.pattern, floe_policy::naming::NamingPattern::Custom { custom_patterns } if custom_patterns.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_CHAIN: &str = r#"
[[promotion_chain.environments]]
name = "dev"
gates = []

[[promotion_chain.environments]]
name = "staging"
gates = ["tests"]
"#;

    #[test]
    fn default_config_is_invalid_without_a_chain() {
        let config = FloeConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn minimal_chain_parses_and_validates() {
        let config: FloeConfig = toml::from_str(MINIMAL_CHAIN).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.promotion_chain.environments.len(), 2);
        assert_eq!(config.gates.max_concurrent, 4);
    }

    #[test]
    fn duplicate_environment_names_are_rejected() {
        let toml = r#"
[[promotion_chain.environments]]
name = "dev"
gates = []

[[promotion_chain.environments]]
name = "dev"
gates = []
"#;
        let config: FloeConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn separation_of_duties_from_must_reference_a_real_environment() {
        let toml = r#"
[[promotion_chain.environments]]
name = "dev"
gates = []

[[promotion_chain.environments]]
name = "prod"
gates = []
separation_of_duties_from = "nonexistent"
"#;
        let config: FloeConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn gate_timeout_parses_from_human_duration() {
        let toml = format!(
            "{MINIMAL_CHAIN}\n[gates]\nmax_concurrent = 8\ntimeout = \"2m\"\n"
        );
        let config: FloeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config.gates.timeout, Duration::from_secs(120));
        assert_eq!(config.gates.max_concurrent, 8);
    }

    #[test]
    fn zero_gate_concurrency_is_rejected() {
        let toml = format!("{MINIMAL_CHAIN}\n[gates]\nmax_concurrent = 0\n");
        let config: FloeConfig = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_naming_pattern_without_patterns_is_rejected() {
        let toml = format!(
            "{MINIMAL_CHAIN}\n[policy.naming]\nlevel = \"strict\"\npattern = \"custom\"\ncustom_patterns = []\n"
        );
        let config: FloeConfig = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_workspace_returns_none_when_absent() {
        let dir = std::env::temp_dir().join(format!("floe-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(FloeConfig::load_from_workspace(&dir).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
