//! Serializes [`PromotionRecord`]/[`RollbackRecord`]/[`EnvironmentLock`] to
//! and from the OCI annotation maps the registry adapter stores them in
//! (§4.7, §6 "OCI annotation keys").
//!
//! This crate does no I/O of its own; it is a thin, pure mapping layer
//! between the typed records in `floe-types` and the `BTreeMap<String,
//! String>` annotation shape `floe-registry` reads and writes. Tamper
//! evidence comes from the immutability of the enclosing env tag, not from
//! anything this crate does.
//!
//! # Example
//!
//! ```
//! use floe_audit::{promotion_record_to_annotations, promotion_record_from_annotations};
//! use floe_types::PromotionRecord;
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! let record = PromotionRecord {
//!     promotion_id: Uuid::nil(),
//!     artifact_digest: format!("sha256:{}", "a".repeat(64)).parse().unwrap(),
//!     artifact_tag: "v1.0.0".into(),
//!     source_env: "dev".into(),
//!     target_env: "staging".into(),
//!     gate_results: vec![],
//!     signature_verified: true,
//!     signature_status: "valid".into(),
//!     operator: "alice@example.com".into(),
//!     promoted_at: Utc::now(),
//!     dry_run: false,
//!     trace_id: "trace-1".into(),
//!     authorization_passed: true,
//!     authorized_via: None,
//!     warnings: vec![],
//! };
//! let annotations = promotion_record_to_annotations(&record);
//! let back = promotion_record_from_annotations(&annotations).unwrap();
//! assert_eq!(back, record);
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use floe_types::{EnvironmentLock, ForcedUnlockRecord, PromotionRecord, RollbackRecord};

/// Full JSON PromotionRecord key.
pub const PROMOTION_ANNOTATION: &str = "dev.floe.promotion";
/// Full JSON RollbackRecord key.
pub const ROLLBACK_ANNOTATION: &str = "dev.floe.rollback";

/// Annotation key for the advisory lock on `env`.
pub fn lock_key(env: &str) -> String {
    format!("dev.floe.lock.{env}")
}

/// Annotation key for the forced-unlock audit trail entry on `env`.
pub fn forced_unlock_key(env: &str) -> String {
    format!("dev.floe.lock.{env}.forced")
}

/// Build the annotation map for a promotion: the full JSON record plus the
/// indexed scalar keys listed in §6.
pub fn promotion_record_to_annotations(record: &PromotionRecord) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        PROMOTION_ANNOTATION.to_string(),
        serde_json::to_string(record).expect("PromotionRecord always serializes"),
    );
    annotations.insert("dev.floe.promotion.id".to_string(), record.promotion_id.to_string());
    annotations.insert("dev.floe.promotion.source".to_string(), record.source_env.clone());
    annotations.insert("dev.floe.promotion.target".to_string(), record.target_env.clone());
    annotations.insert("dev.floe.promotion.operator".to_string(), record.operator.clone());
    annotations.insert("dev.floe.promotion.timestamp".to_string(), record.promoted_at.to_rfc3339());
    annotations.insert("dev.floe.promotion.trace-id".to_string(), record.trace_id.clone());
    annotations.insert("dev.floe.promotion.dry-run".to_string(), record.dry_run.to_string());
    annotations
}

/// Recover a [`PromotionRecord`] from the full-JSON annotation. The indexed
/// scalar keys are write-side conveniences for external tooling (e.g. `oci
/// manifest inspect` grep) and are not required to read a record back.
pub fn promotion_record_from_annotations(annotations: &BTreeMap<String, String>) -> Result<PromotionRecord> {
    let raw = annotations
        .get(PROMOTION_ANNOTATION)
        .context("missing dev.floe.promotion annotation")?;
    serde_json::from_str(raw).context("dev.floe.promotion annotation is not a valid PromotionRecord")
}

/// Build the annotation map for a rollback record.
pub fn rollback_record_to_annotations(record: &RollbackRecord) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ROLLBACK_ANNOTATION.to_string(),
        serde_json::to_string(record).expect("RollbackRecord always serializes"),
    );
    annotations
}

pub fn rollback_record_from_annotations(annotations: &BTreeMap<String, String>) -> Result<RollbackRecord> {
    let raw = annotations
        .get(ROLLBACK_ANNOTATION)
        .context("missing dev.floe.rollback annotation")?;
    serde_json::from_str(raw).context("dev.floe.rollback annotation is not a valid RollbackRecord")
}

/// Serialize an [`EnvironmentLock`] to its annotation value for `env`.
pub fn lock_to_annotation(env: &str, lock: &EnvironmentLock) -> (String, String) {
    (lock_key(env), serde_json::to_string(lock).expect("EnvironmentLock always serializes"))
}

pub fn lock_from_annotation(annotations: &BTreeMap<String, String>, env: &str) -> Result<Option<EnvironmentLock>> {
    match annotations.get(&lock_key(env)) {
        Some(raw) => Ok(Some(
            serde_json::from_str(raw).with_context(|| format!("lock annotation for {env} is malformed"))?,
        )),
        None => Ok(None),
    }
}

/// Serialize a [`ForcedUnlockRecord`] to its annotation value for `env`.
pub fn forced_unlock_to_annotation(env: &str, record: &ForcedUnlockRecord) -> (String, String) {
    (
        forced_unlock_key(env),
        serde_json::to_string(record).expect("ForcedUnlockRecord always serializes"),
    )
}

pub fn forced_unlock_from_annotation(
    annotations: &BTreeMap<String, String>,
    env: &str,
) -> Result<Option<ForcedUnlockRecord>> {
    match annotations.get(&forced_unlock_key(env)) {
        Some(raw) => Ok(Some(
            serde_json::from_str(raw).with_context(|| format!("forced-unlock annotation for {env} is malformed"))?,
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use floe_types::Digest;
    use uuid::Uuid;

    fn digest() -> Digest {
        format!("sha256:{}", "a".repeat(64)).parse().unwrap()
    }

    fn sample_record() -> PromotionRecord {
        PromotionRecord {
            promotion_id: Uuid::nil(),
            artifact_digest: digest(),
            artifact_tag: "v1.0.0".into(),
            source_env: "dev".into(),
            target_env: "staging".into(),
            gate_results: vec![],
            signature_verified: true,
            signature_status: "valid".into(),
            operator: "alice@example.com".into(),
            promoted_at: Utc::now(),
            dry_run: false,
            trace_id: "trace-1".into(),
            authorization_passed: true,
            authorized_via: None,
            warnings: vec![],
        }
    }

    #[test]
    fn promotion_record_round_trips() {
        let record = sample_record();
        let annotations = promotion_record_to_annotations(&record);
        let back = promotion_record_from_annotations(&annotations).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn promotion_record_writes_indexed_scalars() {
        let record = sample_record();
        let annotations = promotion_record_to_annotations(&record);
        assert_eq!(annotations.get("dev.floe.promotion.source").unwrap(), "dev");
        assert_eq!(annotations.get("dev.floe.promotion.target").unwrap(), "staging");
        assert_eq!(annotations.get("dev.floe.promotion.operator").unwrap(), "alice@example.com");
        assert_eq!(annotations.get("dev.floe.promotion.dry-run").unwrap(), "false");
    }

    #[test]
    fn missing_annotation_is_an_error_not_a_panic() {
        let annotations = BTreeMap::new();
        assert!(promotion_record_from_annotations(&annotations).is_err());
    }

    #[test]
    fn rollback_record_round_trips() {
        let record = RollbackRecord {
            rollback_id: Uuid::nil(),
            artifact_digest: digest(),
            previous_digest: digest(),
            environment: "staging".into(),
            reason: "regression".into(),
            operator: "bob@example.com".into(),
            rolled_back_at: Utc::now(),
            trace_id: "trace-2".into(),
        };
        let annotations = rollback_record_to_annotations(&record);
        let back = rollback_record_from_annotations(&annotations).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn lock_round_trips_under_env_scoped_key() {
        let lock = EnvironmentLock {
            locked: true,
            reason: "maintenance".into(),
            locked_by: "sre@example.com".into(),
            locked_at: Utc::now(),
            expires_at: None,
        };
        let (key, value) = lock_to_annotation("prod", &lock);
        assert_eq!(key, "dev.floe.lock.prod");

        let mut annotations = BTreeMap::new();
        annotations.insert(key, value);
        let back = lock_from_annotation(&annotations, "prod").unwrap().unwrap();
        assert_eq!(back, lock);
        assert!(lock_from_annotation(&annotations, "staging").unwrap().is_none());
    }

    #[test]
    fn forced_unlock_round_trips_under_distinct_key_from_lock() {
        let record = ForcedUnlockRecord { unlocked_by: "admin@example.com".into(), unlocked_at: Utc::now(), previous_lock: None };
        let (key, value) = forced_unlock_to_annotation("prod", &record);
        assert_eq!(key, "dev.floe.lock.prod.forced");
        assert_ne!(key, lock_key("prod"));

        let mut annotations = BTreeMap::new();
        annotations.insert(key, value);
        let back = forced_unlock_from_annotation(&annotations, "prod").unwrap().unwrap();
        assert_eq!(back.unlocked_by, record.unlocked_by);
    }
}
