//! Artifact promotion lifecycle core (§4): signature verification, the
//! gate runner, the lock manager, and the promotion controller that wires
//! them to a registry adapter.
//!
//! # Example
//!
//! ```
//! use floe_core::controller::{PromotionController, PromotionControllerConfig};
//! use floe_core::signature::InMemorySignatureOracle;
//! use floe_policy::manifest::Manifest;
//! use floe_registry::InMemoryRegistryAdapter;
//! use floe_types::{EnvironmentConfig, PromotionChain};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # fn main() {
//! tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//!     let registry = Arc::new(InMemoryRegistryAdapter::new());
//!     let digest = format!("sha256:{}", "a".repeat(64)).parse().unwrap();
//!     registry.seed("v1.0.0", digest);
//!
//!     let chain = PromotionChain {
//!         environments: vec![
//!             EnvironmentConfig { name: "dev".into(), gates: vec![], required_operators: None, separation_of_duties_from: None, optional_gates: vec![] },
//!             EnvironmentConfig { name: "staging".into(), gates: vec![], required_operators: None, separation_of_duties_from: None, optional_gates: vec![] },
//!         ],
//!     };
//!
//!     let controller = PromotionController::new(
//!         registry,
//!         BTreeMap::new(),
//!         Arc::new(InMemorySignatureOracle::new()),
//!         Arc::new(Manifest::default()),
//!         PromotionControllerConfig {
//!             chain,
//!             gate_max_concurrent: 4,
//!             gate_timeout: std::time::Duration::from_secs(300),
//!             trusted_signers: vec![],
//!             webhooks: vec![],
//!             strict_ring3: false,
//!         },
//!     );
//!
//!     // No signature was seeded, so this promotion fails signature verification.
//!     let err = controller.promote("v1.0.0", "dev", "staging", "alice@x", false).await.unwrap_err();
//!     assert_eq!(err.exit_code(), 6);
//! });
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod gates;
pub mod lock;
pub mod signature;

pub use controller::{PromotionController, PromotionControllerConfig};
pub use error::{from_registry_error, PromotionError};
pub use gates::{ConfigurableGate, ConfigurableOutcome, Gate, GateContext, GateRunner, PolicyComplianceGate};
pub use lock::LockManager;
pub use signature::{verify_signature, HttpSignatureOracle, InMemorySignatureOracle, OracleRecord, SignatureOracle, SigningLocks};
