//! Core data model for the artifact promotion lifecycle.
//!
//! These types are the wire/annotation shape shared by every other crate in
//! the workspace: the registry adapter produces and consumes them, the
//! policy engine emits [`Violation`]s, the controller assembles
//! [`PromotionRecord`]s, and the webhook notifier serializes [`WebhookEvent`]
//! payloads from them.
//!
//! # Example
//!
//! ```
//! use floe_types::{Digest, Tag};
//!
//! let digest: Digest = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
//!     .parse()
//!     .unwrap();
//! let tag = Tag::parse("v1.0.0-staging").unwrap();
//! assert_eq!(tag.env_name(), Some("staging"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content-addressed artifact digest, `sha256:<64 lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Returns the full `sha256:...` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), DigestParseError> {
        let Some(hex) = s.strip_prefix("sha256:") else {
            return Err(DigestParseError::MissingPrefix);
        };
        if hex.len() != 64 {
            return Err(DigestParseError::WrongLength(hex.len()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(DigestParseError::NotLowerHex);
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Digest(s.to_string()))
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Digest(s))
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a string is not a well-formed `sha256:...` digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must start with \"sha256:\"")]
    MissingPrefix,
    #[error("digest hex part must be 64 characters, got {0}")]
    WrongLength(usize),
    #[error("digest hex part must be lowercase hexadecimal")]
    NotLowerHex,
}

/// One of the four tag classes, each with distinct mutability semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// `v<semver>` — immutable once created.
    Version { version: String },
    /// `v<semver>-<env>` — immutable; records promotion to `env`.
    Env { version: String, env: String },
    /// `latest-<env>` — mutable, points at the newest env-tagged digest.
    Latest { env: String },
    /// `v<semver>-<env>-rollback-<n>` — immutable.
    Rollback { version: String, env: String, n: u32 },
}

impl Tag {
    /// Render this tag back to its canonical string form.
    pub fn render(&self) -> String {
        match self {
            Tag::Version { version } => format!("v{version}"),
            Tag::Env { version, env } => format!("v{version}-{env}"),
            Tag::Latest { env } => format!("latest-{env}"),
            Tag::Rollback { version, env, n } => format!("v{version}-{env}-rollback-{n}"),
        }
    }

    /// Parse a tag string into its class. Tries, in order: latest, rollback,
    /// env, version — rollback and env both start with `v<semver>-` so
    /// rollback (longer, more specific suffix) must be tried first.
    pub fn parse(s: &str) -> Option<Tag> {
        if let Some(env) = s.strip_prefix("latest-") {
            if env.is_empty() {
                return None;
            }
            return Some(Tag::Latest { env: env.to_string() });
        }

        let rest = s.strip_prefix('v')?;

        if let Some(idx) = rest.find("-rollback-") {
            let version = &rest[..idx];
            let after = &rest[idx + "-rollback-".len()..];
            let dash = after.find('-')?;
            let env = &after[..dash];
            let n: u32 = after[dash + 1..].parse().ok()?;
            if version.is_empty() || env.is_empty() {
                return None;
            }
            return Some(Tag::Rollback {
                version: version.to_string(),
                env: env.to_string(),
                n,
            });
        }

        // A bare version tag has no further `-` segments beyond what semver
        // pre-release/build metadata already uses; an env tag appends
        // `-<env-name>` after the semver. We can't fully disambiguate semver
        // pre-release suffixes from env suffixes without a chain to check
        // against, so both Version and Env parses are offered via
        // `parse_with_env_names`.
        Some(Tag::Version { version: rest.to_string() })
    }

    /// Parse a tag, disambiguating `v<semver>` from `v<semver>-<env>` using a
    /// known set of environment names (the promotion chain).
    pub fn parse_with_env_names(s: &str, env_names: &[String]) -> Option<Tag> {
        if let Some(t @ Tag::Latest { .. }) = Tag::parse(s) {
            return Some(t);
        }
        if let Some(t @ Tag::Rollback { .. }) = Tag::parse(s) {
            return Some(t);
        }
        let rest = s.strip_prefix('v')?;
        for env in env_names {
            if let Some(version) = rest.strip_suffix(&format!("-{env}")) {
                return Some(Tag::Env { version: version.to_string(), env: env.clone() });
            }
        }
        Some(Tag::Version { version: rest.to_string() })
    }

    /// The environment name this tag refers to, if any.
    pub fn env_name(&self) -> Option<&str> {
        match self {
            Tag::Env { env, .. } | Tag::Latest { env } | Tag::Rollback { env, .. } => Some(env),
            Tag::Version { .. } => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A gate kind in the gate runner's built-in capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    PolicyCompliance,
    Tests,
    SecurityScan,
    CostAnalysis,
    PerformanceBaseline,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateKind::PolicyCompliance => "policy_compliance",
            GateKind::Tests => "tests",
            GateKind::SecurityScan => "security_scan",
            GateKind::CostAnalysis => "cost_analysis",
            GateKind::PerformanceBaseline => "performance_baseline",
        };
        f.write_str(s)
    }
}

/// Outcome of a single gate invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
    Skipped,
    Warning,
}

/// Result of running one gate against an artifact digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateKind,
    pub status: GateStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One environment in the promotion chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub gates: Vec<GateKind>,
    #[serde(default)]
    pub required_operators: Option<Vec<String>>,
    #[serde(default)]
    pub separation_of_duties_from: Option<String>,
    /// Gates in this set do not block promotion on `failed`, only warn.
    #[serde(default)]
    pub optional_gates: Vec<GateKind>,
}

/// The full ordered chain of environments a tag may be promoted through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PromotionChain {
    pub environments: Vec<EnvironmentConfig>,
}

impl PromotionChain {
    pub fn position(&self, env: &str) -> Option<usize> {
        self.environments.iter().position(|e| e.name == env)
    }

    pub fn get(&self, env: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.name == env)
    }

    /// `to` is a legal forward transition from `from` iff it is the
    /// immediate successor in the chain.
    pub fn is_legal_transition(&self, from: &str, to: &str) -> bool {
        match (self.position(from), self.position(to)) {
            (Some(f), Some(t)) => t == f + 1,
            _ => false,
        }
    }

    pub fn first(&self) -> Option<&EnvironmentConfig> {
        self.environments.first()
    }
}

/// Severity of a policy [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding from the policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub error_code: String,
    pub severity: Severity,
    pub policy_type: String,
    pub model_name: String,
    pub message: String,
    pub expected: String,
    pub actual: String,
    pub suggestion: String,
    pub documentation_url: String,
}

/// Result of running the full policy engine against a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub manifest_version: String,
    pub enforcement_level: String,
    pub duration_ms: u64,
}

/// Outcome of signature verification for an artifact ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureStatus {
    Valid { signer: String },
    Unsigned,
    Invalid { reason: String },
    Expired,
    Error { reason: String },
}

impl SignatureStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            SignatureStatus::Valid { .. } => "valid",
            SignatureStatus::Unsigned => "unsigned",
            SignatureStatus::Invalid { .. } => "invalid",
            SignatureStatus::Expired => "expired",
            SignatureStatus::Error { .. } => "error",
        }
    }
}

/// The audit record created on a successful (or dry-run) promotion.
///
/// Written exactly once per successful promotion; never mutated afterward
/// (I5). `#[serde(deny_unknown_fields)]` enforces §4.7's extra=forbid
/// deserialization contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotionRecord {
    pub promotion_id: Uuid,
    pub artifact_digest: Digest,
    pub artifact_tag: String,
    pub source_env: String,
    pub target_env: String,
    pub gate_results: Vec<GateResult>,
    pub signature_verified: bool,
    pub signature_status: String,
    pub operator: String,
    pub promoted_at: DateTime<Utc>,
    pub dry_run: bool,
    pub trace_id: String,
    pub authorization_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_via: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The audit record created by a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollbackRecord {
    pub rollback_id: Uuid,
    pub artifact_digest: Digest,
    pub previous_digest: Digest,
    pub environment: String,
    pub reason: String,
    pub operator: String,
    pub rolled_back_at: DateTime<Utc>,
    pub trace_id: String,
}

/// Advisory per-environment lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentLock {
    pub locked: bool,
    pub reason: String,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EnvironmentLock {
    /// A lock is considered unlocked once `expires_at` has passed (stale
    /// locks self-expire per §4.5).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.locked {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

/// Advisory forced-unlock audit trail entry (`dev.floe.lock.<env>.forced`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedUnlockRecord {
    pub unlocked_by: String,
    pub unlocked_at: DateTime<Utc>,
    pub previous_lock: Option<EnvironmentLock>,
}

/// Webhook event types the notifier can fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Promote,
    Rollback,
    Lock,
    Unlock,
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WebhookEventType::Promote => "promote",
            WebhookEventType::Rollback => "rollback",
            WebhookEventType::Lock => "lock",
            WebhookEventType::Unlock => "unlock",
        };
        f.write_str(s)
    }
}

/// Configuration for a single webhook subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub events: Vec<WebhookEventType>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(
        default = "default_webhook_timeout_secs",
        rename = "timeout_seconds"
    )]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_retry_count() -> u32 {
    3
}

impl WebhookConfig {
    pub fn subscribes_to(&self, event: WebhookEventType) -> bool {
        self.events.contains(&event)
    }
}

/// A fully-built webhook payload, ready to serialize as the POST body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: WebhookEventType,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Per-environment view in a `status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub promoted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    pub is_latest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// A single entry in the `status` response's promotion history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub promotion_id: Uuid,
    pub artifact_digest: Digest,
    pub source_environment: String,
    pub target_environment: String,
    pub operator: String,
    pub promoted_at: DateTime<Utc>,
}

/// Full `status(tag)` response (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    pub environments: BTreeMap<String, EnvironmentStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_locks: BTreeMap<String, EnvironmentLock>,
    pub history: Vec<HistoryEntry>,
    pub queried_at: DateTime<Utc>,
}

/// Structured, advisory output of `analyze_rollback_impact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackImpact {
    pub from_digest: Digest,
    pub to_digest: Digest,
    pub environment: String,
    pub breaking_changes: Vec<String>,
    pub affected_downstream: Vec<String>,
    pub recommendations: Vec<String>,
}
