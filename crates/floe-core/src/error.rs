//! The Promotion Controller's failure taxonomy (§4.6 "Failure taxonomy",
//! §7 "User-visible failure behavior"), grounded on the original's
//! `OCIError` hierarchy (`floe_core.oci.errors`): one exit code per
//! variant, a one-line message via `Display`, and a `remediation()` hint
//! where the original hierarchy also produces one.

use floe_types::GateResult;

/// Every way a `promote`/`rollback`/`status` call can fail.
///
/// Exit codes match §4.6/§6 exactly: 2 through 14 are the semantic/registry
/// failures the CLI maps straight to `std::process::exit`; `Internal` is
/// the catch-all general error (exit code 1) for anything this taxonomy
/// doesn't name — config errors, annotation corruption, and the
/// `strict_ring3` degraded-success escalation (§7 Open Question).
#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("authentication failed for {registry}: {reason}")]
    Authentication { registry: String, reason: String },

    #[error("artifact not found: {tag} in {registry}")]
    ArtifactNotFound { tag: String, registry: String, available_tags: Vec<String> },

    #[error("cannot overwrite immutable tag {tag} (existing digest: {existing_digest})")]
    ImmutabilityViolation { tag: String, existing_digest: String },

    #[error("registry unavailable: {reason}")]
    RegistryUnavailable { reason: String },

    #[error("circuit breaker open for {registry} (after {failure_count} failures)")]
    CircuitBreakerOpen { registry: String, failure_count: u32 },

    #[error("signature verification failed for {artifact_ref}: {reason}")]
    SignatureVerification { artifact_ref: String, reason: String, signature_status: String },

    #[error("could not acquire signing lock for {artifact_ref} (timeout: {timeout_secs}s)")]
    ConcurrentSigning { artifact_ref: String, timeout_secs: u64 },

    #[error("gate validation failed: {failing_gates:?}")]
    GateValidation { failing_gates: Vec<String>, gate_results: Vec<GateResult> },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition { from: String, to: String, reason: String },

    #[error("tag {tag} already exists with a different digest (existing: {existing_digest})")]
    TagExists { tag: String, existing_digest: String },

    #[error("version {tag} has not been promoted to {env}")]
    VersionNotPromoted { tag: String, env: String },

    #[error("operator {operator} is not authorized to act on {env}")]
    Authorization { operator: String, env: String },

    #[error("environment {env} is locked: {reason} (locked by {locked_by})")]
    EnvironmentLocked { env: String, reason: String, locked_by: String },

    #[error("separation of duties violation: {operator} promoted {from} and may not also promote it to {to}")]
    SeparationOfDuties { operator: String, from: String, to: String },

    /// `strict_ring3` escalation (§7 Open Question resolved): the
    /// promotion otherwise succeeded and its [`floe_types::PromotionRecord`]
    /// was written, but one or more Ring-3 warnings occurred and the
    /// controller was constructed with `strict_ring3 = true`.
    #[error("promotion to {target_env} completed with degraded audit trail under strict_ring3: {warnings:?}")]
    DegradedSuccess { record: Box<floe_types::PromotionRecord>, target_env: String, warnings: Vec<String> },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PromotionError {
    /// CLI exit code per §4.6/§6. `0` (success) and `1` (this taxonomy's
    /// catch-all) are not represented here; the CLI maps `Ok` to `0`.
    pub fn exit_code(&self) -> i32 {
        match self {
            PromotionError::Authentication { .. } => 2,
            PromotionError::ArtifactNotFound { .. } => 3,
            PromotionError::ImmutabilityViolation { .. } => 4,
            PromotionError::RegistryUnavailable { .. } => 5,
            PromotionError::CircuitBreakerOpen { .. } => 5,
            PromotionError::SignatureVerification { .. } => 6,
            PromotionError::ConcurrentSigning { .. } => 7,
            PromotionError::GateValidation { .. } => 8,
            PromotionError::InvalidTransition { .. } => 9,
            PromotionError::TagExists { .. } => 10,
            PromotionError::VersionNotPromoted { .. } => 11,
            PromotionError::Authorization { .. } => 12,
            PromotionError::EnvironmentLocked { .. } => 13,
            PromotionError::SeparationOfDuties { .. } => 14,
            PromotionError::DegradedSuccess { .. } => 1,
            PromotionError::Internal(_) => 1,
        }
    }

    /// A remediation hint for operators, where the failure suggests one
    /// concrete next action (mirrors the original's per-exception
    /// `Remediation:` docstring sections).
    pub fn remediation(&self) -> Option<String> {
        match self {
            PromotionError::SignatureVerification { artifact_ref, reason, .. } => {
                if reason.contains("unsigned") {
                    Some(format!("sign the artifact: floe artifact sign {artifact_ref}"))
                } else if reason.contains("trusted_signers") || reason.contains("signer") {
                    Some("update trusted_signers in the signature config to include the actual signer, or re-sign with an authorized identity".into())
                } else if reason.contains("expired") {
                    Some(format!("re-sign the artifact: floe artifact sign --force {artifact_ref}"))
                } else {
                    Some("verify connectivity to the signature transparency log and re-sign if needed".into())
                }
            }
            PromotionError::ConcurrentSigning { .. } => {
                Some("wait for the other signing process to finish, or raise signature.lock_timeout".into())
            }
            PromotionError::ImmutabilityViolation { .. } => Some("use a new version number; existing tags are immutable".into()),
            PromotionError::TagExists { .. } => Some("a different digest already occupies this tag; verify the intended version before retrying".into()),
            PromotionError::InvalidTransition { .. } => {
                Some("promote only to the immediate successor environment in the promotion chain".into())
            }
            PromotionError::EnvironmentLocked { .. } => Some("unlock the environment, or have the lock holder complete their work first".into()),
            PromotionError::SeparationOfDuties { .. } => {
                Some("have a different operator perform this promotion".into())
            }
            PromotionError::VersionNotPromoted { .. } => Some("promote the version to the source environment first".into()),
            PromotionError::CircuitBreakerOpen { .. } => Some("wait for the registry circuit breaker cooldown to elapse before retrying".into()),
            PromotionError::GateValidation { failing_gates, .. } => {
                Some(format!("resolve the failing gates before retrying: {}", failing_gates.join(", ")))
            }
            _ => None,
        }
    }
}

/// Map a [`floe_registry::RegistryError`] into the richer
/// [`PromotionError`] taxonomy. `context` is the tag or operation the
/// error occurred against, used to fill in `registry`/`tag` fields.
pub fn from_registry_error(err: floe_registry::RegistryError, context: &str) -> PromotionError {
    use floe_registry::RegistryError;
    match err {
        RegistryError::NotFound(tag) => {
            PromotionError::ArtifactNotFound { tag, registry: context.to_string(), available_tags: Vec::new() }
        }
        RegistryError::TagExists { tag, existing } => {
            PromotionError::TagExists { tag, existing_digest: existing.to_string() }
        }
        RegistryError::Authentication(reason) => {
            PromotionError::Authentication { registry: context.to_string(), reason }
        }
        RegistryError::Unavailable(reason) => {
            PromotionError::RegistryUnavailable { reason: format!("{context}: {reason}") }
        }
        RegistryError::CircuitBreakerOpen { registry, failure_count } => {
            PromotionError::CircuitBreakerOpen { registry, failure_count }
        }
    }
}
