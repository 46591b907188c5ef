//! OCI registry adapter (§4.1).
//!
//! Exposes the five operations the Promotion Controller needs against an
//! OCI distribution-spec registry: `inspect`, `list_tags`, `put_tag`,
//! `get_annotations`, `set_annotations`. [`HttpRegistryAdapter`] talks to a
//! real registry over `reqwest`; [`InMemoryRegistryAdapter`] is a
//! deterministic in-process double used throughout the rest of the
//! workspace's test suite so the Controller's extensive scenario tests
//! never need network access.
//!
//! # Example
//!
//! ```
//! use floe_registry::{InMemoryRegistryAdapter, RegistryAdapter, PutTagOptions};
//!
//! # fn main() {
//! tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//!     let adapter = InMemoryRegistryAdapter::new();
//!     let digest = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
//!     adapter.put_tag("v1.0.0", &digest, PutTagOptions::default()).await.unwrap();
//!     let inspected = adapter.inspect("v1.0.0").await.unwrap();
//!     assert_eq!(inspected.digest, digest);
//! });
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use floe_types::Digest;
use tokio::sync::Mutex as AsyncMutex;

/// Errors the adapter surfaces. `NotFound` is semantically meaningful, not
/// exceptional (§4.1): callers branch on it routinely.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tag {tag} already exists with a different digest (existing: {existing})")]
    TagExists { tag: String, existing: Digest },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("circuit breaker open for {registry} (after {failure_count} failures)")]
    CircuitBreakerOpen { registry: String, failure_count: u32 },
}

/// Result of `inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspected {
    pub digest: Digest,
    pub annotations: BTreeMap<String, String>,
}

/// Options for `put_tag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutTagOptions {
    pub if_not_exists: bool,
}

/// Result of `put_tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct PutTagResult {
    pub existed: bool,
    pub existing_digest: Option<Digest>,
}

/// Abstract OCI registry operations (§4.1). Implemented by a real HTTP
/// client and by an in-memory double used in tests.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    async fn inspect(&self, tag: &str) -> Result<Inspected, RegistryError>;
    async fn list_tags(&self, prefix: Option<&str>) -> Result<Vec<String>, RegistryError>;
    async fn put_tag(
        &self,
        tag: &str,
        digest: &Digest,
        opts: PutTagOptions,
    ) -> Result<PutTagResult, RegistryError>;
    async fn get_annotations(&self, tag: &str) -> Result<BTreeMap<String, String>, RegistryError>;
    async fn set_annotations(
        &self,
        tag: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, Default)]
struct Entry {
    digest: Digest,
    annotations: BTreeMap<String, String>,
}

/// Deterministic in-process registry double. Used pervasively by the
/// Controller/Lock Manager/Audit store test suites (§4.1 implementation
/// note).
#[derive(Default)]
pub struct InMemoryRegistryAdapter {
    tags: Mutex<BTreeMap<String, Entry>>,
}

impl InMemoryRegistryAdapter {
    pub fn new() -> Self {
        Self { tags: Mutex::new(BTreeMap::new()) }
    }

    /// Test helper: seed a tag directly without going through `put_tag`'s
    /// conditional semantics.
    pub fn seed(&self, tag: &str, digest: Digest) {
        let mut tags = self.tags.lock().unwrap();
        tags.insert(tag.to_string(), Entry { digest, annotations: BTreeMap::new() });
    }

    /// Test helper: a byte-identical snapshot of all tags and annotations,
    /// used to assert dry-run purity (P6).
    pub fn snapshot(&self) -> BTreeMap<String, (Digest, BTreeMap<String, String>)> {
        self.tags
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), (v.digest.clone(), v.annotations.clone())))
            .collect()
    }
}

#[async_trait]
impl RegistryAdapter for InMemoryRegistryAdapter {
    async fn inspect(&self, tag: &str) -> Result<Inspected, RegistryError> {
        let tags = self.tags.lock().unwrap();
        tags.get(tag)
            .map(|e| Inspected { digest: e.digest.clone(), annotations: e.annotations.clone() })
            .ok_or_else(|| RegistryError::NotFound(tag.to_string()))
    }

    async fn list_tags(&self, prefix: Option<&str>) -> Result<Vec<String>, RegistryError> {
        let tags = self.tags.lock().unwrap();
        Ok(tags
            .keys()
            .filter(|t| prefix.map(|p| t.starts_with(p)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn put_tag(
        &self,
        tag: &str,
        digest: &Digest,
        opts: PutTagOptions,
    ) -> Result<PutTagResult, RegistryError> {
        let mut tags = self.tags.lock().unwrap();
        if let Some(existing) = tags.get(tag) {
            if &existing.digest == digest {
                return Ok(PutTagResult { existed: true, existing_digest: Some(digest.clone()) });
            }
            if opts.if_not_exists {
                return Err(RegistryError::TagExists {
                    tag: tag.to_string(),
                    existing: existing.digest.clone(),
                });
            }
            // Mutable tag (e.g. latest-<env>): overwrite.
            tags.insert(tag.to_string(), Entry { digest: digest.clone(), annotations: existing.annotations.clone() });
            return Ok(PutTagResult { existed: true, existing_digest: Some(existing.digest.clone()) });
        }
        tags.insert(tag.to_string(), Entry { digest: digest.clone(), annotations: BTreeMap::new() });
        Ok(PutTagResult { existed: false, existing_digest: None })
    }

    async fn get_annotations(&self, tag: &str) -> Result<BTreeMap<String, String>, RegistryError> {
        let tags = self.tags.lock().unwrap();
        tags.get(tag)
            .map(|e| e.annotations.clone())
            .ok_or_else(|| RegistryError::NotFound(tag.to_string()))
    }

    async fn set_annotations(
        &self,
        tag: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        let mut tags = self.tags.lock().unwrap();
        let entry = tags.get_mut(tag).ok_or_else(|| RegistryError::NotFound(tag.to_string()))?;
        entry.annotations = annotations;
        Ok(())
    }
}

/// Circuit breaker state (§5, §1B's gauge-shaped discriminants: 0 closed,
/// 1 open, 2 half_open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

/// Per-registry circuit breaker. Rebuilds on process restart (§9 "Global
/// state"): this is intentionally in-memory, not durable.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: AsyncMutex<CircuitInner>,
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: AsyncMutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Returns the state after accounting for cooldown elapsed since last
    /// open.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
        inner.state
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// HTTP client against a real OCI distribution-spec registry.
///
/// Grounded on the teacher's blocking `RegistryClient` wrapper, rebuilt on
/// the async `reqwest::Client` this workspace uses throughout (§4.3
/// implementation note).
pub struct HttpRegistryAdapter {
    base_url: String,
    repository: String,
    client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl HttpRegistryAdapter {
    pub fn new(base_url: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            repository: repository.into(),
            client: reqwest::Client::builder()
                .user_agent(concat!("floe-registry/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("client config is valid"),
            circuit_breaker: CircuitBreaker::new(5, Duration::from_secs(30)),
        }
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.base_url, self.repository, reference)
    }

    async fn guard(&self) -> Result<(), RegistryError> {
        if matches!(self.circuit_breaker.state().await, CircuitState::Open) {
            return Err(RegistryError::CircuitBreakerOpen {
                registry: self.base_url.clone(),
                failure_count: 0,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryAdapter for HttpRegistryAdapter {
    async fn inspect(&self, tag: &str) -> Result<Inspected, RegistryError> {
        self.guard().await?;
        let span = tracing::info_span!("floe.oci.inspect", registry = %self.base_url, tag);
        let _enter = span.enter();

        let resp = self
            .client
            .get(self.manifest_url(tag))
            .header("Accept", "application/vnd.oci.image.manifest.v1+json")
            .send()
            .await;

        match resp {
            Ok(r) if r.status() == reqwest::StatusCode::NOT_FOUND => {
                self.circuit_breaker.record_success().await;
                Err(RegistryError::NotFound(tag.to_string()))
            }
            Ok(r) if r.status().is_success() => {
                self.circuit_breaker.record_success().await;
                let digest = r
                    .headers()
                    .get("Docker-Content-Digest")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body: serde_json::Value = r.json().await.map_err(|e| RegistryError::Unavailable(e.to_string()))?;
                let annotations = body
                    .get("annotations")
                    .and_then(|a| a.as_object())
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                let digest = digest
                    .parse()
                    .map_err(|_| RegistryError::Unavailable("registry returned malformed digest".into()))?;
                Ok(Inspected { digest, annotations })
            }
            Ok(r) if r.status() == reqwest::StatusCode::UNAUTHORIZED => {
                self.circuit_breaker.record_failure().await;
                Err(RegistryError::Authentication(format!("401 for {tag}")))
            }
            Ok(r) => {
                self.circuit_breaker.record_failure().await;
                Err(RegistryError::Unavailable(format!("unexpected status {}", r.status())))
            }
            Err(e) => {
                self.circuit_breaker.record_failure().await;
                Err(RegistryError::Unavailable(e.to_string()))
            }
        }
    }

    async fn list_tags(&self, prefix: Option<&str>) -> Result<Vec<String>, RegistryError> {
        self.guard().await?;
        let url = format!("{}/v2/{}/tags/list", self.base_url, self.repository);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            self.circuit_breaker.record_failure().await;
            return Err(RegistryError::Unavailable(format!("list_tags status {}", resp.status())));
        }
        self.circuit_breaker.record_success().await;
        let body: serde_json::Value = resp.json().await.map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        let tags: Vec<String> = body
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        Ok(match prefix {
            Some(p) => tags.into_iter().filter(|t| t.starts_with(p)).collect(),
            None => tags,
        })
    }

    async fn put_tag(
        &self,
        tag: &str,
        digest: &Digest,
        opts: PutTagOptions,
    ) -> Result<PutTagResult, RegistryError> {
        self.guard().await?;
        if opts.if_not_exists {
            match self.inspect(tag).await {
                Ok(existing) if &existing.digest == digest => {
                    return Ok(PutTagResult { existed: true, existing_digest: Some(digest.clone()) });
                }
                Ok(existing) => {
                    return Err(RegistryError::TagExists { tag: tag.to_string(), existing: existing.digest });
                }
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": { "mediaType": "application/vnd.oci.empty.v1+json", "digest": digest.as_str(), "size": 0 },
            "layers": [],
        });

        let resp = self
            .client
            .put(self.manifest_url(tag))
            .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
            .json(&manifest)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            self.circuit_breaker.record_failure().await;
            return Err(RegistryError::Unavailable(format!("put_tag status {}", resp.status())));
        }
        self.circuit_breaker.record_success().await;
        Ok(PutTagResult { existed: false, existing_digest: None })
    }

    async fn get_annotations(&self, tag: &str) -> Result<BTreeMap<String, String>, RegistryError> {
        Ok(self.inspect(tag).await?.annotations)
    }

    async fn set_annotations(
        &self,
        tag: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        self.guard().await?;
        let current = self.inspect(tag).await?;
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": { "mediaType": "application/vnd.oci.empty.v1+json", "digest": current.digest.as_str(), "size": 0 },
            "layers": [],
            "annotations": annotations,
        });
        let resp = self
            .client
            .put(self.manifest_url(tag))
            .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
            .json(&manifest)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            self.circuit_breaker.record_failure().await;
            return Err(RegistryError::Unavailable(format!("set_annotations status {}", resp.status())));
        }
        self.circuit_breaker.record_success().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(b: &str) -> Digest {
        format!("sha256:{}", b.repeat(64)).parse().unwrap()
    }

    #[tokio::test]
    async fn put_tag_then_inspect() {
        let adapter = InMemoryRegistryAdapter::new();
        let d = digest("a");
        adapter.put_tag("v1.0.0", &d, PutTagOptions::default()).await.unwrap();
        let inspected = adapter.inspect("v1.0.0").await.unwrap();
        assert_eq!(inspected.digest, d);
    }

    #[tokio::test]
    async fn inspect_missing_tag_is_not_found() {
        let adapter = InMemoryRegistryAdapter::new();
        assert!(matches!(adapter.inspect("v9.9.9").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_tag_if_not_exists_same_digest_is_idempotent() {
        let adapter = InMemoryRegistryAdapter::new();
        let d = digest("a");
        adapter.put_tag("v1.0.0-staging", &d, PutTagOptions { if_not_exists: true }).await.unwrap();
        let result = adapter
            .put_tag("v1.0.0-staging", &d, PutTagOptions { if_not_exists: true })
            .await
            .unwrap();
        assert!(result.existed);
    }

    #[tokio::test]
    async fn put_tag_if_not_exists_different_digest_fails() {
        let adapter = InMemoryRegistryAdapter::new();
        adapter.put_tag("v1.0.0-staging", &digest("a"), PutTagOptions { if_not_exists: true }).await.unwrap();
        let result = adapter
            .put_tag("v1.0.0-staging", &digest("b"), PutTagOptions { if_not_exists: true })
            .await;
        assert!(matches!(result, Err(RegistryError::TagExists { .. })));
    }

    #[tokio::test]
    async fn latest_pointer_is_mutable_without_if_not_exists() {
        let adapter = InMemoryRegistryAdapter::new();
        adapter.put_tag("latest-staging", &digest("a"), PutTagOptions::default()).await.unwrap();
        adapter.put_tag("latest-staging", &digest("b"), PutTagOptions::default()).await.unwrap();
        assert_eq!(adapter.inspect("latest-staging").await.unwrap().digest, digest("b"));
    }

    #[tokio::test]
    async fn annotations_round_trip() {
        let adapter = InMemoryRegistryAdapter::new();
        adapter.put_tag("v1.0.0-staging", &digest("a"), PutTagOptions::default()).await.unwrap();
        let mut annotations = BTreeMap::new();
        annotations.insert("dev.floe.promotion.operator".to_string(), "alice@x".to_string());
        adapter.set_annotations("v1.0.0-staging", annotations.clone()).await.unwrap();
        assert_eq!(adapter.get_annotations("v1.0.0-staging").await.unwrap(), annotations);
    }

    #[tokio::test]
    async fn list_tags_filters_by_prefix() {
        let adapter = InMemoryRegistryAdapter::new();
        adapter.put_tag("v1.0.0-dev", &digest("a"), PutTagOptions::default()).await.unwrap();
        adapter.put_tag("v1.0.0-staging", &digest("a"), PutTagOptions::default()).await.unwrap();
        adapter.put_tag("latest-dev", &digest("a"), PutTagOptions::default()).await.unwrap();
        let tags = adapter.list_tags(Some("v1.0.0-")).await.unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn circuit_breaker_closes_on_success() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn circuit_breaker_half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_inspect() {
        let adapter = InMemoryRegistryAdapter::new();
        adapter.put_tag("v1.0.0", &digest("a"), PutTagOptions::default()).await.unwrap();
        let before = adapter.snapshot();
        let _ = adapter.inspect("v1.0.0").await;
        let after = adapter.snapshot();
        assert_eq!(before, after);
    }
}
