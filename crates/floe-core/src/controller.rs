//! The Promotion Controller (§4.6): the central state machine wiring the
//! Registry Adapter, Signature Verifier, Gate Runner, Lock Manager, Audit
//! Store, and Webhook Notifier into `promote`/`rollback`/`status`/
//! `analyze_rollback_impact`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use floe_policy::manifest::Manifest;
use floe_registry::{PutTagOptions, RegistryAdapter, RegistryError};
use floe_retry::RetryPolicy;
use floe_types::{
    Digest, EnvironmentStatus, GateKind, GateStatus, HistoryEntry, PromotionChain, PromotionRecord, RollbackImpact,
    RollbackRecord, SignatureStatus, StatusResponse, Tag, WebhookConfig, WebhookEventType,
};
use floe_webhook::WebhookNotifier;
use uuid::Uuid;

use crate::error::{from_registry_error, PromotionError};
use crate::gates::{Gate, GateContext, GateRunner};
use crate::lock::LockManager;
use crate::signature::{signature_status_reason, verify_signature, SignatureOracle, SigningLocks};

/// Construction parameters for a [`PromotionController`].
pub struct PromotionControllerConfig {
    pub chain: PromotionChain,
    pub gate_max_concurrent: usize,
    pub gate_timeout: std::time::Duration,
    pub trusted_signers: Vec<String>,
    pub webhooks: Vec<WebhookConfig>,
    pub strict_ring3: bool,
    pub signing_lock_timeout: std::time::Duration,
}

pub struct PromotionController {
    registry: Arc<dyn RegistryAdapter>,
    chain: PromotionChain,
    gates: BTreeMap<GateKind, Arc<dyn Gate>>,
    gate_runner: GateRunner,
    lock_manager: LockManager,
    signature_oracle: Arc<dyn SignatureOracle>,
    signing_locks: SigningLocks,
    signing_lock_timeout: std::time::Duration,
    trusted_signers: Vec<String>,
    manifest: Arc<Manifest>,
    webhook_notifier: Option<Arc<WebhookNotifier>>,
    strict_ring3: bool,
}

impl PromotionController {
    pub fn new(
        registry: Arc<dyn RegistryAdapter>,
        gates: BTreeMap<GateKind, Arc<dyn Gate>>,
        signature_oracle: Arc<dyn SignatureOracle>,
        manifest: Arc<Manifest>,
        config: PromotionControllerConfig,
    ) -> Self {
        let webhook_notifier =
            if config.webhooks.is_empty() { None } else { Some(Arc::new(WebhookNotifier::new(config.webhooks))) };
        Self {
            lock_manager: LockManager::new(registry.clone()),
            registry,
            chain: config.chain,
            gates,
            gate_runner: GateRunner::new(config.gate_max_concurrent, config.gate_timeout),
            signature_oracle,
            signing_locks: SigningLocks::new(),
            signing_lock_timeout: config.signing_lock_timeout,
            trusted_signers: config.trusted_signers,
            manifest,
            webhook_notifier,
            strict_ring3: config.strict_ring3,
        }
    }

    fn version_of(tag: &str) -> String {
        tag.strip_prefix('v').unwrap_or(tag).to_string()
    }

    fn fire_webhook(&self, event: WebhookEventType, payload: serde_json::Value) {
        if let Some(notifier) = &self.webhook_notifier {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier.notify_all(event, payload).await;
            });
        }
    }

    /// Step 1 of `promote`: `to` must be the immediate successor of `from`.
    fn validate_transition(&self, from: &str, to: &str) -> Result<(), PromotionError> {
        let from_pos = self.chain.position(from);
        let to_pos = self.chain.position(to);
        let (Some(f), Some(t)) = (from_pos, to_pos) else {
            return Err(PromotionError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("{from} or {to} is not a configured environment in the promotion chain"),
            });
        };
        if t < f {
            return Err(PromotionError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: "cannot promote backward in the chain".to_string(),
            });
        }
        if t != f + 1 {
            return Err(PromotionError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: "cannot skip an environment in the chain".to_string(),
            });
        }
        Ok(())
    }

    fn check_authorization(&self, to: &str, operator: &str) -> Result<(), PromotionError> {
        let Some(env_cfg) = self.chain.get(to) else { return Ok(()) };
        if let Some(required) = &env_cfg.required_operators {
            if !required.iter().any(|o| o == operator) {
                return Err(PromotionError::Authorization { operator: operator.to_string(), env: to.to_string() });
            }
        }
        Ok(())
    }

    /// `promote(tag, from, to, operator, dry_run)` (§4.6 steps 1-13).
    pub async fn promote(
        &self,
        tag: &str,
        from: &str,
        to: &str,
        operator: &str,
        dry_run: bool,
    ) -> Result<PromotionRecord, PromotionError> {
        let trace_id = Uuid::new_v4().to_string();
        let version = Self::version_of(tag);

        // 1. Transition validation.
        self.validate_transition(from, to)?;

        // 2. Authorization check, before any lock check or registry mutation.
        self.check_authorization(to, operator)?;

        // 3. Lock check.
        if let Some(lock) = self.lock_manager.current_lock(to).await? {
            return Err(PromotionError::EnvironmentLocked {
                env: to.to_string(),
                reason: lock.reason,
                locked_by: lock.locked_by,
            });
        }

        // 4. Digest resolution.
        let is_first_env = self.chain.first().map(|e| e.name.as_str()) == Some(from);
        let source_ref = if is_first_env { tag.to_string() } else { Tag::Env { version: version.clone(), env: from.to_string() }.render() };
        let inspected = self.registry.inspect(&source_ref).await.map_err(|e| match e {
            RegistryError::NotFound(_) => {
                PromotionError::VersionNotPromoted { tag: tag.to_string(), env: from.to_string() }
            }
            other => from_registry_error(other, &source_ref),
        })?;
        let source_digest = inspected.digest;

        // 5. Separation of duties.
        if let Some(env_cfg) = self.chain.get(to) {
            if env_cfg.separation_of_duties_from.as_deref() == Some(from) {
                if let Ok(prior) = floe_audit::promotion_record_from_annotations(&inspected.annotations) {
                    if prior.operator == operator {
                        return Err(PromotionError::SeparationOfDuties {
                            operator: operator.to_string(),
                            from: from.to_string(),
                            to: to.to_string(),
                        });
                    }
                }
            }
        }

        // 6. Signature verification, serialized per artifact ref so two
        // concurrent promotions of the same digest never race the oracle.
        let _signing_guard = self.signing_locks.acquire(&source_ref, self.signing_lock_timeout).await?;
        let signature_status = verify_signature(self.signature_oracle.as_ref(), &source_ref, &self.trusted_signers).await;
        if !matches!(signature_status, SignatureStatus::Valid { .. }) {
            return Err(PromotionError::SignatureVerification {
                artifact_ref: source_ref.clone(),
                reason: signature_status_reason(&signature_status),
                signature_status: signature_status.as_label().to_string(),
            });
        }

        // 7. Gate evaluation.
        let env_cfg = self.chain.get(to).expect("validated in step 1");
        let ctx = GateContext {
            artifact_digest: source_digest.clone(),
            artifact_tag: tag.to_string(),
            target_env: to.to_string(),
            manifest: self.manifest.clone(),
        };
        let gate_results = self.gate_runner.run_all(&env_cfg.gates, &self.gates, &ctx).await;
        let failing: Vec<String> = gate_results
            .iter()
            .filter(|r| r.status == GateStatus::Failed && !env_cfg.optional_gates.contains(&r.gate))
            .map(|r| r.gate.to_string())
            .collect();
        if !failing.is_empty() {
            return Err(PromotionError::GateValidation { failing_gates: failing, gate_results });
        }

        // 8. Dry run: return without touching the registry.
        if dry_run {
            return Ok(PromotionRecord {
                promotion_id: Uuid::new_v4(),
                artifact_digest: source_digest,
                artifact_tag: tag.to_string(),
                source_env: from.to_string(),
                target_env: to.to_string(),
                gate_results,
                signature_verified: true,
                signature_status: signature_status.as_label().to_string(),
                operator: operator.to_string(),
                promoted_at: Utc::now(),
                dry_run: true,
                trace_id,
                authorization_passed: true,
                authorized_via: None,
                warnings: Vec::new(),
            });
        }

        // 9. Env tag creation (idempotent by (tag, digest): same-digest retry
        // succeeds silently, different-digest is TagExists via `from_registry_error`).
        let target_ref = Tag::Env { version: version.clone(), env: to.to_string() }.render();
        self.registry
            .put_tag(&target_ref, &source_digest, PutTagOptions { if_not_exists: true })
            .await
            .map_err(|e| from_registry_error(e, &target_ref))?;

        let promoted_at = Utc::now();
        let mut warnings = Vec::new();

        // 10. Latest pointer update, bounded retries.
        let latest_ref = Tag::Latest { env: to.to_string() }.render();
        let retry_config = RetryPolicy::LatestPointer.to_config();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.registry.put_tag(&latest_ref, &source_digest, PutTagOptions::default()).await {
                Ok(_) => break,
                Err(e) => {
                    if attempt >= retry_config.max_attempts {
                        warnings.push(format!("failed to update {latest_ref} after {attempt} attempts: {e}"));
                        break;
                    }
                    tokio::time::sleep(floe_retry::calculate_delay(&retry_config, attempt)).await;
                }
            }
        }

        let mut record = PromotionRecord {
            promotion_id: Uuid::new_v4(),
            artifact_digest: source_digest,
            artifact_tag: tag.to_string(),
            source_env: from.to_string(),
            target_env: to.to_string(),
            gate_results,
            signature_verified: true,
            signature_status: signature_status.as_label().to_string(),
            operator: operator.to_string(),
            promoted_at,
            dry_run: false,
            trace_id,
            authorization_passed: true,
            authorized_via: None,
            warnings,
        };

        // 11. Annotation write; failure degrades to a warning, step 9 stands.
        match self.registry.get_annotations(&target_ref).await {
            Ok(mut annotations) => {
                annotations.extend(floe_audit::promotion_record_to_annotations(&record));
                if let Err(e) = self.registry.set_annotations(&target_ref, annotations).await {
                    record.warnings.push(format!("failed to write promotion annotation: {e}"));
                }
            }
            Err(e) => record.warnings.push(format!("failed to read annotations before write: {e}")),
        }

        // 12. Webhook fan-out, fire-and-forget.
        let payload = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);
        self.fire_webhook(WebhookEventType::Promote, payload);

        // 13. strict_ring3 escalation (§7 Open Question resolved).
        if self.strict_ring3 && !record.warnings.is_empty() {
            let warnings = record.warnings.clone();
            return Err(PromotionError::DegradedSuccess { record: Box::new(record), target_env: to.to_string(), warnings });
        }

        Ok(record)
    }

    /// `rollback(tag, env, reason, operator)` (§4.6).
    pub async fn rollback(
        &self,
        tag: &str,
        env: &str,
        reason: &str,
        operator: &str,
    ) -> Result<RollbackRecord, PromotionError> {
        let version = Self::version_of(tag);
        let env_ref = Tag::Env { version: version.clone(), env: env.to_string() }.render();

        let inspected = self.registry.inspect(&env_ref).await.map_err(|e| match e {
            RegistryError::NotFound(_) => {
                PromotionError::VersionNotPromoted { tag: tag.to_string(), env: env.to_string() }
            }
            other => from_registry_error(other, &env_ref),
        })?;
        let target_digest = inspected.digest;

        let latest_ref = Tag::Latest { env: env.to_string() }.render();
        let previous_digest = self
            .registry
            .inspect(&latest_ref)
            .await
            .map(|i| i.digest)
            .unwrap_or_else(|_| target_digest.clone());

        let prefix = format!("v{version}-{env}-rollback-");
        let existing = self.registry.list_tags(Some(&prefix)).await.map_err(|e| from_registry_error(e, &prefix))?;
        let next_n = existing
            .iter()
            .filter_map(|t| t.strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1);

        let rollback_ref = Tag::Rollback { version: version.clone(), env: env.to_string(), n: next_n }.render();
        self.registry
            .put_tag(&rollback_ref, &target_digest, PutTagOptions { if_not_exists: true })
            .await
            .map_err(|e| from_registry_error(e, &rollback_ref))?;
        self.registry
            .put_tag(&latest_ref, &target_digest, PutTagOptions::default())
            .await
            .map_err(|e| from_registry_error(e, &latest_ref))?;

        let record = RollbackRecord {
            rollback_id: Uuid::new_v4(),
            artifact_digest: target_digest,
            previous_digest,
            environment: env.to_string(),
            reason: reason.to_string(),
            operator: operator.to_string(),
            rolled_back_at: Utc::now(),
            trace_id: Uuid::new_v4().to_string(),
        };

        if let Ok(mut annotations) = self.registry.get_annotations(&rollback_ref).await {
            annotations.extend(floe_audit::rollback_record_to_annotations(&record));
            let _ = self.registry.set_annotations(&rollback_ref, annotations).await;
        }

        let payload = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);
        self.fire_webhook(WebhookEventType::Rollback, payload);

        Ok(record)
    }

    /// `status(tag)` (§4.6, §6 JSON schema).
    pub async fn status(&self, tag: &str) -> Result<StatusResponse, PromotionError> {
        let version = Self::version_of(tag);
        let digest = self.registry.inspect(tag).await.ok().map(|i| i.digest);

        let mut environments = BTreeMap::new();
        let mut environment_locks = BTreeMap::new();
        let mut history = Vec::new();

        for env_cfg in &self.chain.environments {
            let env_ref = Tag::Env { version: version.clone(), env: env_cfg.name.clone() }.render();
            let latest_ref = Tag::Latest { env: env_cfg.name.clone() }.render();

            let env_status = match self.registry.inspect(&env_ref).await {
                Ok(inspected) => {
                    let record = floe_audit::promotion_record_from_annotations(&inspected.annotations).ok();
                    let latest_digest = self.registry.inspect(&latest_ref).await.ok().map(|i| i.digest);
                    let is_latest = latest_digest.as_ref() == Some(&inspected.digest);
                    if let Some(r) = &record {
                        history.push(HistoryEntry {
                            promotion_id: r.promotion_id,
                            artifact_digest: r.artifact_digest.clone(),
                            source_environment: r.source_env.clone(),
                            target_environment: r.target_env.clone(),
                            operator: r.operator.clone(),
                            promoted_at: r.promoted_at,
                        });
                    }
                    EnvironmentStatus {
                        promoted: true,
                        promoted_at: record.as_ref().map(|r| r.promoted_at),
                        is_latest,
                        operator: record.map(|r| r.operator),
                    }
                }
                Err(RegistryError::NotFound(_)) => {
                    EnvironmentStatus { promoted: false, promoted_at: None, is_latest: false, operator: None }
                }
                Err(e) => return Err(from_registry_error(e, &env_ref)),
            };
            environments.insert(env_cfg.name.clone(), env_status);

            if let Some(lock) = self.lock_manager.current_lock(&env_cfg.name).await? {
                environment_locks.insert(env_cfg.name.clone(), lock);
            }
        }

        history.sort_by_key(|h| h.promoted_at);

        Ok(StatusResponse { tag: tag.to_string(), digest, environments, environment_locks, history, queried_at: Utc::now() })
    }

    /// `analyze_rollback_impact` (§4.6 Open Question resolved): advisory,
    /// no side effects. `from_ref`/`to_ref` are the two env (or rollback)
    /// tags whose PromotionRecords are being compared.
    pub async fn analyze_rollback_impact(
        &self,
        env: &str,
        from_ref: &str,
        to_ref: &str,
    ) -> Result<RollbackImpact, PromotionError> {
        let from_inspected = self.registry.inspect(from_ref).await.map_err(|e| from_registry_error(e, from_ref))?;
        let to_inspected = self.registry.inspect(to_ref).await.map_err(|e| from_registry_error(e, to_ref))?;

        let from_record = floe_audit::promotion_record_from_annotations(&from_inspected.annotations).ok();
        let to_record = floe_audit::promotion_record_from_annotations(&to_inspected.annotations).ok();

        let from_gates: BTreeMap<GateKind, GateStatus> =
            from_record.as_ref().map(|r| r.gate_results.iter().map(|g| (g.gate, g.status)).collect()).unwrap_or_default();
        let to_gates: BTreeMap<GateKind, GateStatus> =
            to_record.as_ref().map(|r| r.gate_results.iter().map(|g| (g.gate, g.status)).collect()).unwrap_or_default();

        let mut breaking_changes = Vec::new();
        let mut recommendations = Vec::new();

        for (kind, to_status) in &to_gates {
            match from_gates.get(kind) {
                Some(from_status) if from_status != to_status => breaking_changes.push(format!(
                    "gate {kind} changed from {from_status:?} to {to_status:?} between the two digests"
                )),
                None => breaking_changes.push(format!("gate {kind} was not evaluated for the prior digest")),
                _ => {}
            }
        }
        for kind in from_gates.keys() {
            if !to_gates.contains_key(kind) {
                recommendations
                    .push(format!("gate {kind} is no longer declared; confirm the drop was intentional before relying on this rollback"));
            }
        }

        let from_keys: BTreeSet<&String> = from_inspected.annotations.keys().collect();
        let to_keys: BTreeSet<&String> = to_inspected.annotations.keys().collect();
        for key in from_keys.difference(&to_keys) {
            recommendations.push(format!("annotation \"{key}\" present on the prior digest is absent on the target digest"));
        }
        for key in to_keys.difference(&from_keys) {
            recommendations.push(format!("annotation \"{key}\" is new on the target digest"));
        }

        Ok(RollbackImpact {
            from_digest: from_inspected.digest,
            to_digest: to_inspected.digest,
            environment: env.to_string(),
            breaking_changes,
            // No downstream lineage tracker is wired into this core (out of scope); left empty.
            affected_downstream: Vec::new(),
            recommendations,
        })
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn chain(&self) -> &PromotionChain {
        &self.chain
    }
}
