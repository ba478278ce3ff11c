//! rollcheck core
//!
//! Upgrade scenarios for a replicated key-value cluster:
//! - [`HarnessConfig`]: TOML + environment configuration
//! - [`Backend`]: the process, client and status surfaces a scenario drives
//! - [`Harness`]: runs the rolling and concurrent-restart scenarios to a [`Verdict`]
//! - [`ScenarioError`]: why a scenario failed
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcheck_core::{EtcdBackend, Harness, HarnessConfig, ScenarioKind};
//! use std::sync::Arc;
//!
//! let config = HarnessConfig::load(None)?;
//! let backend = Arc::new(EtcdBackend::from_config(&config));
//! let report = Harness::new(config, backend).run(ScenarioKind::Rolling).await;
//! println!("{}", report.generate_text());
//! ```

#![warn(unreachable_pub)]

pub mod backend;
pub mod config;
pub mod error;
pub mod scenario;
pub mod types;

pub use backend::{Backend, EtcdBackend};
pub use config::{
    ClientSection, ClusterSection, ConvergenceSection, HarnessConfig, ScenarioSection,
    ENV_BIN_DIR, ENV_TARGET_VERSION,
};
pub use error::ScenarioError;
pub use scenario::{Harness, KEY_PREFIX, PROBE_VALUE};
pub use types::{ScenarioId, ScenarioKind, ScenarioReport, Verdict};
