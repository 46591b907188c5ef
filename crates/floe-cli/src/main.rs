use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use floe_config::FloeConfig;
use floe_core::gates::{ConfigurableGate, ConfigurableOutcome, Gate, PolicyComplianceGate};
use floe_core::signature::{HttpSignatureOracle, InMemorySignatureOracle, SignatureOracle};
use floe_core::{PromotionController, PromotionControllerConfig, PromotionError};
use floe_policy::manifest::Manifest;
use floe_policy::PolicyEngineConfig;
use floe_registry::{HttpRegistryAdapter, InMemoryRegistryAdapter, RegistryAdapter};
use floe_types::GateKind;

#[derive(Parser, Debug)]
#[command(name = "floe", version)]
#[command(about = "Artifact promotion lifecycle for OCI-addressed data platform releases")]
struct Cli {
    /// Path to floe.toml (default: ./floe.toml)
    #[arg(long, default_value = "floe.toml")]
    config: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Promote an artifact tag from one environment to the next.
    Promote {
        tag: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll an environment back to the prior promoted digest.
    Rollback {
        tag: String,
        #[arg(long)]
        env: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        operator: String,
    },
    /// Show the promotion status of a tag across the chain.
    Status { tag: String },
    /// Lock an environment against further promotions.
    Lock {
        env: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        operator: String,
        /// Lock TTL, e.g. "2h". Absent means no expiry.
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Release a lock held by the caller.
    Unlock {
        env: String,
        #[arg(long)]
        operator: String,
    },
    /// Release a lock regardless of holder, leaving an audit trail entry.
    ForceUnlock {
        env: String,
        #[arg(long)]
        operator: String,
    },
    /// Advisory diff of gate results and annotations between two refs.
    AnalyzeRollbackImpact {
        env: String,
        #[arg(long)]
        from_ref: String,
        #[arg(long)]
        to_ref: String,
    },
    /// Print environment and configuration diagnostics.
    Doctor,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!("floe_cli={level},floe_core={level}")))
        .with_writer(std::io::stderr)
        .try_init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[error] failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(err),
    }
}

/// Maps a top-level failure to the process exit code and prints a
/// operator-facing message plus remediation hint, mirroring the original
/// per-exception `Remediation:` sections (§4.6/§6 exit code table).
fn report_failure(err: anyhow::Error) -> ExitCode {
    if let Some(promo_err) = err.downcast_ref::<PromotionError>() {
        eprintln!("[error] {promo_err}");
        if let Some(hint) = promo_err.remediation() {
            eprintln!("[hint] {hint}");
        }
        ExitCode::from(promo_err.exit_code() as u8)
    } else {
        eprintln!("[error] {err:#}");
        ExitCode::from(1)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let controller = build_controller(&config)?;

    match cli.cmd {
        Commands::Promote { tag, from, to, operator, dry_run } => {
            let record = controller.promote(&tag, &from, &to, &operator, dry_run).await?;
            print_result(cli.format, &record)?;
        }
        Commands::Rollback { tag, env, reason, operator } => {
            let record = controller.rollback(&tag, &env, &reason, &operator).await?;
            print_result(cli.format, &record)?;
        }
        Commands::Status { tag } => {
            let status = controller.status(&tag).await?;
            print_result(cli.format, &status)?;
        }
        Commands::Lock { env, reason, operator, ttl } => {
            let ttl = ttl.as_deref().map(parse_chrono_duration).transpose()?;
            let lock = controller.lock_manager().lock(&env, &operator, &reason, ttl).await?;
            print_result(cli.format, &lock)?;
        }
        Commands::Unlock { env, operator } => {
            controller.lock_manager().unlock(&env, &operator).await?;
            println!("unlocked {env}");
        }
        Commands::ForceUnlock { env, operator } => {
            controller.lock_manager().force_unlock(&env, &operator).await?;
            println!("force-unlocked {env} (audit entry written)");
        }
        Commands::AnalyzeRollbackImpact { env, from_ref, to_ref } => {
            let impact = controller.analyze_rollback_impact(&env, &from_ref, &to_ref).await?;
            print_result(cli.format, &impact)?;
        }
        Commands::Doctor => {
            run_doctor(&config, &controller).await?;
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<FloeConfig> {
    if path.exists() {
        FloeConfig::load_from_file(path)
    } else {
        eprintln!("[warn] {} not found; using defaults (dev-only, in-memory registry)", path.display());
        Ok(FloeConfig::default())
    }
}

fn parse_chrono_duration(s: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(parse_duration(s)?).context("duration out of range")
}

fn print_result<T: serde::Serialize + std::fmt::Debug>(format: OutputFormat, value: &T) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Text => {
            println!("{value:#?}");
        }
    }
    Ok(())
}

fn build_controller(config: &FloeConfig) -> Result<PromotionController> {
    let registry: Arc<dyn RegistryAdapter> = match &config.registry {
        Some(reg) => Arc::new(HttpRegistryAdapter::new(reg.base_url.clone(), reg.repository.clone())),
        None => Arc::new(InMemoryRegistryAdapter::new()),
    };

    let signature_oracle: Arc<dyn SignatureOracle> = match &config.signature.oracle_url {
        Some(url) => Arc::new(HttpSignatureOracle::new(url.clone())),
        None => Arc::new(InMemorySignatureOracle::new()),
    };

    let mut gates: BTreeMap<GateKind, Arc<dyn Gate>> = BTreeMap::new();
    gates.insert(
        GateKind::PolicyCompliance,
        Arc::new(PolicyComplianceGate::new(PolicyEngineConfig {
            naming: config.policy.naming.clone(),
            custom_policies: config.policy.custom.clone(),
            strict: config.policy.strict,
        })),
    );
    for kind in [GateKind::Tests, GateKind::SecurityScan, GateKind::CostAnalysis, GateKind::PerformanceBaseline] {
        gates.insert(kind, Arc::new(ConfigurableGate::new(kind, ConfigurableOutcome::default())));
    }

    Ok(PromotionController::new(
        registry,
        gates,
        signature_oracle,
        Arc::new(Manifest::default()),
        PromotionControllerConfig {
            chain: config.promotion_chain.clone(),
            gate_max_concurrent: config.gates.max_concurrent,
            gate_timeout: config.gates.timeout,
            trusted_signers: config.signature.trusted_signers.clone(),
            webhooks: config.webhooks.clone(),
            strict_ring3: config.strict_ring3,
            signing_lock_timeout: config.signature.lock_timeout,
        },
    ))
}

async fn run_doctor(config: &FloeConfig, controller: &PromotionController) -> Result<()> {
    println!("promotion_chain: {}", config.promotion_chain.environments.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(" -> "));
    match &config.registry {
        Some(reg) => println!("registry: {} (repository: {})", reg.base_url, reg.repository),
        None => println!("registry: in-memory (no [registry] section configured)"),
    }
    match &config.signature.oracle_url {
        Some(url) => println!("signature_oracle: {url}"),
        None => println!("signature_oracle: in-memory (no signature.oracle_url configured; all artifacts verify unsigned)"),
    }
    println!("trusted_signers: {:?}", config.signature.trusted_signers);
    println!("gates.max_concurrent: {}", config.gates.max_concurrent);
    println!("gates.timeout: {:?}", config.gates.timeout);
    println!("strict_ring3: {}", config.strict_ring3);

    for env in &config.promotion_chain.environments {
        let locked = controller.lock_manager().is_locked(&env.name).await?;
        println!("{}: locked={locked}", env.name);
    }

    Ok(())
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_valid_and_invalid_inputs() {
        assert!(parse_duration("1s").is_ok());
        assert!(parse_duration("nope").is_err());
    }

    #[test]
    fn parse_chrono_duration_converts_from_humantime() {
        let d = parse_chrono_duration("2h").unwrap();
        assert_eq!(d, chrono::Duration::hours(2));
    }

    #[test]
    fn load_config_falls_back_to_defaults_when_missing() {
        let path = PathBuf::from("/nonexistent/floe.toml");
        let config = load_config(&path).unwrap();
        assert!(config.promotion_chain.environments.is_empty());
    }

    #[test]
    fn build_controller_defaults_to_in_memory_registry() {
        let config = FloeConfig::default();
        assert!(build_controller(&config).is_ok());
    }
}
