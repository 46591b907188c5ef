//! Lock manager (§4.5): advisory, per-environment locks stored as OCI
//! annotations on a sentinel tag, rather than a local lock file — the
//! registry is the only storage this system has that every Controller
//! instance shares. Acquire/check/release/force, with stale-by-timestamp
//! auto-expiry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use floe_registry::{PutTagOptions, RegistryAdapter};
use floe_types::{Digest, EnvironmentLock, ForcedUnlockRecord};

use crate::error::{from_registry_error, PromotionError};

/// Sentinel tag holding every environment's lock annotations. A registry
/// tag's annotations can only be set once the tag exists (§4.1), so this
/// tag is bootstrapped with a placeholder digest on first use and never
/// points at a real artifact.
pub const LOCK_SENTINEL_TAG: &str = "floe-locks";

fn placeholder_digest() -> Digest {
    format!("sha256:{}", "0".repeat(64)).parse().expect("placeholder digest is well-formed")
}

/// Manages per-environment advisory locks against a registry.
pub struct LockManager {
    registry: Arc<dyn RegistryAdapter>,
}

impl LockManager {
    pub fn new(registry: Arc<dyn RegistryAdapter>) -> Self {
        Self { registry }
    }

    async fn ensure_sentinel(&self) -> Result<(), PromotionError> {
        match self.registry.inspect(LOCK_SENTINEL_TAG).await {
            Ok(_) => Ok(()),
            Err(floe_registry::RegistryError::NotFound(_)) => {
                self.registry
                    .put_tag(LOCK_SENTINEL_TAG, &placeholder_digest(), PutTagOptions { if_not_exists: true })
                    .await
                    .map(|_| ())
                    .map_err(|e| from_registry_error(e, LOCK_SENTINEL_TAG))
            }
            Err(e) => Err(from_registry_error(e, LOCK_SENTINEL_TAG)),
        }
    }

    async fn read_annotations(&self) -> Result<BTreeMap<String, String>, PromotionError> {
        self.ensure_sentinel().await?;
        self.registry
            .get_annotations(LOCK_SENTINEL_TAG)
            .await
            .map_err(|e| from_registry_error(e, LOCK_SENTINEL_TAG))
    }

    async fn write_annotations(&self, annotations: BTreeMap<String, String>) -> Result<(), PromotionError> {
        self.registry
            .set_annotations(LOCK_SENTINEL_TAG, annotations)
            .await
            .map_err(|e| from_registry_error(e, LOCK_SENTINEL_TAG))
    }

    /// The active lock for `env`, if any. A lock whose `expires_at` has
    /// passed is treated as absent (§4.5 stale-expiry) but is left in place
    /// for `unlock`/`force_unlock` to clean up explicitly.
    pub async fn current_lock(&self, env: &str) -> Result<Option<EnvironmentLock>, PromotionError> {
        let annotations = self.read_annotations().await?;
        let lock = floe_audit::lock_from_annotation(&annotations, env).map_err(PromotionError::from)?;
        Ok(lock.filter(|l| l.is_active(Utc::now())))
    }

    pub async fn is_locked(&self, env: &str) -> Result<bool, PromotionError> {
        Ok(self.current_lock(env).await?.is_some())
    }

    /// Acquire a lock on `env`. Fails with `EnvironmentLocked` if an active
    /// lock already exists and is held by a different operator; callers
    /// that want to override someone else's lock must call
    /// [`LockManager::force_unlock`] first. The same operator re-locking
    /// (e.g. to renew a TTL) succeeds and overwrites the existing lock.
    pub async fn lock(
        &self,
        env: &str,
        locked_by: &str,
        reason: &str,
        ttl: Option<ChronoDuration>,
    ) -> Result<EnvironmentLock, PromotionError> {
        if let Some(existing) = self.current_lock(env).await? {
            if existing.locked_by != locked_by {
                return Err(PromotionError::EnvironmentLocked {
                    env: env.to_string(),
                    reason: existing.reason.clone(),
                    locked_by: existing.locked_by.clone(),
                });
            }
        }

        let now = Utc::now();
        let new_lock = EnvironmentLock {
            locked: true,
            reason: reason.to_string(),
            locked_by: locked_by.to_string(),
            locked_at: now,
            expires_at: ttl.map(|d| now + d),
        };

        let mut annotations = self.read_annotations().await?;
        let (key, value) = floe_audit::lock_to_annotation(env, &new_lock);
        annotations.insert(key, value);
        self.write_annotations(annotations).await?;
        Ok(new_lock)
    }

    /// Release the lock on `env` iff `unlocked_by` holds it. Use
    /// [`LockManager::force_unlock`] to release on behalf of someone else.
    pub async fn unlock(&self, env: &str, unlocked_by: &str) -> Result<(), PromotionError> {
        let Some(existing) = self.current_lock(env).await? else {
            return Ok(());
        };
        if existing.locked_by != unlocked_by {
            return Err(PromotionError::Authorization { operator: unlocked_by.to_string(), env: env.to_string() });
        }
        self.remove_lock(env).await
    }

    /// Release the lock on `env` regardless of holder, writing a distinct
    /// forced-unlock audit trail entry (§4.5 Open Question resolved: force
    /// unlock is always auditable, never silent).
    pub async fn force_unlock(&self, env: &str, unlocked_by: &str) -> Result<(), PromotionError> {
        let previous_lock = self.current_lock(env).await?;
        let record = ForcedUnlockRecord { unlocked_by: unlocked_by.to_string(), unlocked_at: Utc::now(), previous_lock };

        let mut annotations = self.read_annotations().await?;
        let (key, value) = floe_audit::forced_unlock_to_annotation(env, &record);
        annotations.insert(key, value);
        annotations.remove(&floe_audit::lock_key(env));
        self.write_annotations(annotations).await
    }

    async fn remove_lock(&self, env: &str) -> Result<(), PromotionError> {
        let mut annotations = self.read_annotations().await?;
        annotations.remove(&floe_audit::lock_key(env));
        self.write_annotations(annotations).await
    }

    /// The most recent forced-unlock entry for `env`, if one exists.
    pub async fn forced_unlock_history(&self, env: &str) -> Result<Option<ForcedUnlockRecord>, PromotionError> {
        let annotations = self.read_annotations().await?;
        floe_audit::forced_unlock_from_annotation(&annotations, env).map_err(PromotionError::from)
    }
}
