//! Signature verification (§4.2) and the per-artifact-ref advisory signing
//! lock that serializes concurrent signing/verification against the same
//! ref.
//!
//! The verification oracle is external (§6 "Signature store"); this module
//! defines the trait it must satisfy and a deterministic in-memory double
//! for tests, mirroring how `floe-registry` splits `RegistryAdapter`
//! between an HTTP implementation and `InMemoryRegistryAdapter`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use floe_types::SignatureStatus;

use crate::error::PromotionError;

/// What the verification oracle reports for one artifact ref.
#[derive(Debug, Clone)]
pub struct OracleRecord {
    pub signer_identity: Option<String>,
    pub cryptographically_valid: bool,
    pub transparency_log_reachable: bool,
    pub expired: bool,
}

/// External signature verification oracle (§6 "Signature store").
#[async_trait]
pub trait SignatureOracle: Send + Sync {
    /// `Ok(None)` means the ref carries no signature at all (`Unsigned`).
    async fn query(&self, artifact_ref: &str) -> anyhow::Result<Option<OracleRecord>>;
}

/// Deterministic in-memory oracle double, seeded by tests.
#[derive(Default)]
pub struct InMemorySignatureOracle {
    records: Mutex<BTreeMap<String, OracleRecord>>,
}

impl InMemorySignatureOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, artifact_ref: &str, record: OracleRecord) {
        self.records.lock().unwrap().insert(artifact_ref.to_string(), record);
    }
}

#[async_trait]
impl SignatureOracle for InMemorySignatureOracle {
    async fn query(&self, artifact_ref: &str) -> anyhow::Result<Option<OracleRecord>> {
        Ok(self.records.lock().unwrap().get(artifact_ref).cloned())
    }
}

/// Glob-style matching idiom for trusted-signer patterns (§4.2): split the
/// pattern on `*` and check the literal pieces appear in order, with the
/// first/last piece anchored to the start/end unless the pattern itself
/// starts or ends with `*`. Not a full regex engine.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Verify `artifact_ref` against the oracle and the trusted-signer
/// patterns (§4.2). A signature is `Valid` iff the oracle reports it as
/// cryptographically valid AND the signer identity matches at least one
/// trusted pattern AND, if it carries a transparency-log inclusion, the
/// log is reachable. Any oracle error that is not a definitive invalidity
/// becomes `Error`, never a panic.
pub async fn verify_signature(
    oracle: &dyn SignatureOracle,
    artifact_ref: &str,
    trusted_patterns: &[String],
) -> SignatureStatus {
    match oracle.query(artifact_ref).await {
        Ok(None) => SignatureStatus::Unsigned,
        Ok(Some(record)) => {
            if record.expired {
                return SignatureStatus::Expired;
            }
            if !record.cryptographically_valid {
                return SignatureStatus::Invalid { reason: "signature is not cryptographically valid".into() };
            }
            let Some(signer) = &record.signer_identity else {
                return SignatureStatus::Invalid { reason: "signature carries no signer identity".into() };
            };
            if !trusted_patterns.iter().any(|p| glob_match(p, signer)) {
                return SignatureStatus::Invalid {
                    reason: format!("signer \"{signer}\" does not match any trusted_signers pattern"),
                };
            }
            if !record.transparency_log_reachable {
                return SignatureStatus::Invalid { reason: "transparency log inclusion could not be verified".into() };
            }
            SignatureStatus::Valid { signer: signer.clone() }
        }
        Err(err) => SignatureStatus::Error { reason: err.to_string() },
    }
}

/// Human-readable reason string for a non-`Valid` [`SignatureStatus`],
/// used to fill `PromotionError::SignatureVerification.reason`.
pub fn signature_status_reason(status: &SignatureStatus) -> String {
    match status {
        SignatureStatus::Unsigned => "artifact is unsigned".into(),
        SignatureStatus::Invalid { reason } => reason.clone(),
        SignatureStatus::Expired => "signature has expired".into(),
        SignatureStatus::Error { reason } => reason.clone(),
        SignatureStatus::Valid { .. } => String::new(),
    }
}

/// Talks to an external signature transparency service over HTTP (§6
/// "Signature store": artifact-ref -> `{status, signer_identity, signed_at}`),
/// the same `reqwest`-client-plus-base-url shape as `floe_registry::HttpRegistryAdapter`.
pub struct HttpSignatureOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSignatureOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .user_agent(concat!("floe-core/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("client config is valid"),
        }
    }

    fn verify_url(&self, artifact_ref: &str) -> String {
        format!("{}/v1/verify/{artifact_ref}", self.base_url)
    }
}

#[derive(serde::Deserialize)]
struct OracleResponse {
    status: String,
    signer_identity: Option<String>,
    #[serde(default)]
    transparency_log_reachable: bool,
}

#[async_trait]
impl SignatureOracle for HttpSignatureOracle {
    async fn query(&self, artifact_ref: &str) -> anyhow::Result<Option<OracleRecord>> {
        let span = tracing::info_span!("floe.signature.query", registry = %self.base_url, artifact_ref);
        let _enter = span.enter();

        let resp = self.client.get(self.verify_url(artifact_ref)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: OracleResponse = resp.json().await?;
        Ok(Some(OracleRecord {
            signer_identity: body.signer_identity,
            cryptographically_valid: body.status == "valid" || body.status == "expired",
            transparency_log_reachable: body.transparency_log_reachable,
            expired: body.status == "expired",
        }))
    }
}

/// Per-artifact-ref advisory signing lock (§4.2, §5 "Locking discipline"),
/// preventing racing OCI annotation rewrites during signing/verification.
/// Process-local only (§9 "Global state": rebuilds on restart).
#[derive(Default)]
pub struct SigningLocks {
    locks: Mutex<BTreeMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SigningLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, artifact_ref: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(artifact_ref.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Acquire the advisory lock for `artifact_ref`, failing with
    /// `ConcurrentSigning` if it is not free within `timeout`.
    pub async fn acquire(
        &self,
        artifact_ref: &str,
        timeout: Duration,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, PromotionError> {
        let mutex = self.lock_for(artifact_ref);
        tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| PromotionError::ConcurrentSigning {
                artifact_ref: artifact_ref.to_string(),
                timeout_secs: timeout.as_secs(),
            })
    }
}
