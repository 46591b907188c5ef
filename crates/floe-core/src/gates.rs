//! Gate runner (§4.3): runs the gates declared for a target environment
//! concurrently, bounded by a semaphore, each under its own timeout, and
//! reassembles results in declaration order (P5) regardless of completion
//! order.
//!
//! Async registry/policy calls replace blocking subprocess invocations
//! here, so the fan-out is `tokio::spawn` + `Semaphore` + `timeout` rather
//! than an `std::thread` worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use floe_policy::manifest::Manifest;
use floe_policy::{PolicyEngine, PolicyEngineConfig};
use floe_types::{GateKind, GateResult, GateStatus};
use tokio::sync::Semaphore;

/// Everything a gate needs to evaluate an artifact. Fields are `Arc`-wrapped
/// so a [`GateContext`] can be cloned cheaply into a `'static` task spawned
/// by the [`GateRunner`].
#[derive(Clone)]
pub struct GateContext {
    pub artifact_digest: floe_types::Digest,
    pub artifact_tag: String,
    pub target_env: String,
    pub manifest: Arc<Manifest>,
}

/// One pluggable promotion gate (§4.3).
#[async_trait]
pub trait Gate: Send + Sync {
    fn kind(&self) -> GateKind;
    async fn run(&self, ctx: &GateContext) -> anyhow::Result<(GateStatus, Option<serde_json::Value>)>;
}

/// Wraps [`PolicyEngine`] as the `policy_compliance` gate.
pub struct PolicyComplianceGate {
    engine: PolicyEngine,
}

impl PolicyComplianceGate {
    pub fn new(config: PolicyEngineConfig) -> Self {
        Self { engine: PolicyEngine::new(config) }
    }
}

#[async_trait]
impl Gate for PolicyComplianceGate {
    fn kind(&self) -> GateKind {
        GateKind::PolicyCompliance
    }

    async fn run(&self, ctx: &GateContext) -> anyhow::Result<(GateStatus, Option<serde_json::Value>)> {
        let result = self.engine.evaluate(&ctx.manifest);
        let status = if result.passed { GateStatus::Passed } else { GateStatus::Failed };
        let details = serde_json::to_value(&result).ok();
        Ok((status, details))
    }
}

/// Outcome a [`ConfigurableGate`] is told to return, set up by tests and by
/// integrations that have no real `tests`/`security_scan`/`cost_analysis`/
/// `performance_baseline` runner wired in yet (§4.3 Non-goals: this system
/// orchestrates those tools, it does not implement them).
#[derive(Debug, Clone)]
pub struct ConfigurableOutcome {
    pub status: GateStatus,
    pub details: Option<serde_json::Value>,
    pub delay: Option<Duration>,
    pub error: Option<String>,
}

impl Default for ConfigurableOutcome {
    fn default() -> Self {
        Self { status: GateStatus::Passed, details: None, delay: None, error: None }
    }
}

/// A gate whose outcome is fixed in advance, standing in for the
/// externally-run `tests`/`security_scan`/`cost_analysis`/
/// `performance_baseline` gates this system invokes but does not implement.
pub struct ConfigurableGate {
    kind: GateKind,
    outcome: ConfigurableOutcome,
}

impl ConfigurableGate {
    pub fn new(kind: GateKind, outcome: ConfigurableOutcome) -> Self {
        Self { kind, outcome }
    }
}

#[async_trait]
impl Gate for ConfigurableGate {
    fn kind(&self) -> GateKind {
        self.kind
    }

    async fn run(&self, _ctx: &GateContext) -> anyhow::Result<(GateStatus, Option<serde_json::Value>)> {
        if let Some(delay) = self.outcome.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.outcome.error {
            anyhow::bail!("{reason}");
        }
        Ok((self.outcome.status, self.outcome.details.clone()))
    }
}

/// Runs a declared set of gates concurrently, bounded by `max_concurrent`,
/// each under `timeout`. Declaration order is preserved in the returned
/// vector independent of which gate finishes first (P5).
pub struct GateRunner {
    max_concurrent: usize,
    timeout: Duration,
}

impl GateRunner {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self { max_concurrent, timeout }
    }

    /// `gates` is keyed by [`GateKind`] so callers can look gates up by name;
    /// `declared` fixes the order results come back in.
    pub async fn run_all(
        &self,
        declared: &[GateKind],
        gates: &BTreeMap<GateKind, Arc<dyn Gate>>,
        ctx: &GateContext,
    ) -> Vec<GateResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut slots: Vec<Option<GateResult>> = vec![None; declared.len()];
        let mut handles = Vec::with_capacity(declared.len());

        for (index, kind) in declared.iter().enumerate() {
            let kind = *kind;
            let Some(gate) = gates.get(&kind).cloned() else {
                slots[index] = Some(GateResult { gate: kind, status: GateStatus::Skipped, duration_ms: 0, details: None });
                continue;
            };
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let timeout = self.timeout;

            handles.push((index, tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let started = std::time::Instant::now();
                let outcome = tokio::time::timeout(timeout, gate.run(&ctx)).await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(Ok((status, details))) => GateResult { gate: kind, status, duration_ms, details },
                    Ok(Err(err)) => GateResult {
                        gate: kind,
                        status: GateStatus::Failed,
                        duration_ms,
                        details: Some(serde_json::json!({ "error": err.to_string() })),
                    },
                    Err(_) => GateResult {
                        gate: kind,
                        status: GateStatus::Failed,
                        duration_ms,
                        details: Some(serde_json::json!({ "error": format!("gate timed out after {timeout:?}") })),
                    },
                }
            })));
        }

        for (index, handle) in handles {
            let result = handle.await.expect("gate task panicked");
            slots[index] = Some(result);
        }

        slots.into_iter().map(|s| s.expect("every declared gate slot is filled")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_policy::naming::{EnforcementLevel, NamingConfig, NamingPattern};

    fn digest() -> floe_types::Digest {
        format!("sha256:{}", "a".repeat(64)).parse().unwrap()
    }

    fn ctx() -> GateContext {
        GateContext {
            artifact_digest: digest(),
            artifact_tag: "v1.0.0".into(),
            target_env: "staging".into(),
            manifest: Arc::new(Manifest::default()),
        }
    }

    fn passing_policy_gate() -> Arc<dyn Gate> {
        Arc::new(PolicyComplianceGate::new(PolicyEngineConfig {
            naming: NamingConfig { level: EnforcementLevel::Off, pattern: NamingPattern::Medallion },
            custom_policies: vec![],
            strict: true,
        }))
    }

    #[tokio::test]
    async fn results_preserve_declaration_order_regardless_of_completion_order() {
        let runner = GateRunner::new(4, Duration::from_secs(5));
        let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        gates.insert(
            GateKind::Tests,
            Arc::new(ConfigurableGate::new(
                GateKind::Tests,
                ConfigurableOutcome { delay: Some(Duration::from_millis(40)), ..Default::default() },
            )),
        );
        gates.insert(
            GateKind::SecurityScan,
            Arc::new(ConfigurableGate::new(GateKind::SecurityScan, ConfigurableOutcome::default())),
        );
        let declared = vec![GateKind::Tests, GateKind::SecurityScan];

        let results = runner.run_all(&declared, &gates, &ctx()).await;
        assert_eq!(results[0].gate, GateKind::Tests);
        assert_eq!(results[1].gate, GateKind::SecurityScan);
    }

    #[tokio::test]
    async fn undeclared_gate_kind_is_marked_skipped() {
        let runner = GateRunner::new(4, Duration::from_secs(5));
        let gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        let declared = vec![GateKind::Tests];
        let results = runner.run_all(&declared, &gates, &ctx()).await;
        assert_eq!(results[0].status, GateStatus::Skipped);
    }

    #[tokio::test]
    async fn gate_exceeding_timeout_fails() {
        let runner = GateRunner::new(4, Duration::from_millis(20));
        let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        gates.insert(
            GateKind::Tests,
            Arc::new(ConfigurableGate::new(
                GateKind::Tests,
                ConfigurableOutcome { delay: Some(Duration::from_millis(100)), ..Default::default() },
            )),
        );
        let results = runner.run_all(&[GateKind::Tests], &gates, &ctx()).await;
        assert_eq!(results[0].status, GateStatus::Failed);
    }

    #[tokio::test]
    async fn gate_returning_error_fails_with_details() {
        let runner = GateRunner::new(4, Duration::from_secs(5));
        let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        gates.insert(
            GateKind::CostAnalysis,
            Arc::new(ConfigurableGate::new(
                GateKind::CostAnalysis,
                ConfigurableOutcome { error: Some("cost API unreachable".into()), ..Default::default() },
            )),
        );
        let results = runner.run_all(&[GateKind::CostAnalysis], &gates, &ctx()).await;
        assert_eq!(results[0].status, GateStatus::Failed);
        assert!(results[0].details.is_some());
    }

    #[tokio::test]
    async fn policy_compliance_gate_passes_on_empty_manifest() {
        let runner = GateRunner::new(4, Duration::from_secs(5));
        let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        gates.insert(GateKind::PolicyCompliance, passing_policy_gate());
        let results = runner.run_all(&[GateKind::PolicyCompliance], &gates, &ctx()).await;
        assert_eq!(results[0].status, GateStatus::Passed);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_concurrent() {
        let runner = GateRunner::new(1, Duration::from_secs(5));
        let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
        for kind in [GateKind::Tests, GateKind::SecurityScan, GateKind::CostAnalysis] {
            gates.insert(
                kind,
                Arc::new(ConfigurableGate::new(
                    kind,
                    ConfigurableOutcome { delay: Some(Duration::from_millis(10)), ..Default::default() },
                )),
            );
        }
        let declared = vec![GateKind::Tests, GateKind::SecurityScan, GateKind::CostAnalysis];
        let results = runner.run_all(&declared, &gates, &ctx()).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == GateStatus::Passed));
    }
}
