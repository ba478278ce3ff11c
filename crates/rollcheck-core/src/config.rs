//! Harness configuration
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! ```toml
//! [binaries]
//! etcd = "bin/etcd"
//! etcd_last_release = "bin/etcd-last-release"
//! etcdctl = "bin/etcdctl"
//!
//! [cluster]
//! size = 3
//! base_port = 20000
//! base_scheme = "unix"
//!
//! [convergence]
//! target_version = "3.6"
//! max_attempts = 7
//! interval_ms = 1000
//! ```
//!
//! `ROLLCHECK_BIN_DIR` replaces all three binaries with the conventional
//! layout inside that directory; `ROLLCHECK_TARGET_VERSION` replaces the
//! convergence target.

use crate::error::ScenarioError;
use crate::types::ScenarioKind;
use rollcheck_cluster::{BinPaths, BinaryVersion, ClusterConfig, Scheme, TlsFiles, TlsMode};
use rollcheck_verify::{cluster_version, ClientOptions, ClientTls, Consistency, ConvergenceTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding `etcd`, `etcd-last-release` and `etcdctl`
pub const ENV_BIN_DIR: &str = "ROLLCHECK_BIN_DIR";
/// Expected major.minor cluster version after an upgrade
pub const ENV_TARGET_VERSION: &str = "ROLLCHECK_TARGET_VERSION";
/// Cluster version the binary under test is expected to negotiate
pub const DEFAULT_TARGET_VERSION: &str = "3.6";

/// Full harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawConfig")]
pub struct HarnessConfig {
    /// Binary locations
    pub binaries: BinPaths,
    /// Cluster shape shared by every scenario
    pub cluster: ClusterSection,
    /// Client connection settings
    pub client: ClientSection,
    /// Convergence polling budget
    pub convergence: ConvergenceSection,
    /// Sequential rolling upgrade
    pub rolling: ScenarioSection,
    /// Concurrent full-cluster restart
    pub restart: ScenarioSection,
}

/// `[cluster]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Number of members
    pub size: usize,
    /// First client port
    pub base_port: u16,
    /// Peer transport
    pub base_scheme: Scheme,
    /// TLS mode
    pub tls: TlsMode,
    /// PEM certificate, required with TLS
    pub cert_file: Option<PathBuf>,
    /// PEM key, required with TLS
    pub key_file: Option<PathBuf>,
    /// PEM CA bundle, required with TLS
    pub ca_file: Option<PathBuf>,
    /// Readiness deadline per launch
    pub ready_timeout_ms: u64,
    /// Exit deadline per stop
    pub stop_timeout_ms: u64,
    /// Parent of the per-cluster data directory
    pub data_root: Option<PathBuf>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            size: 3,
            base_port: 20000,
            base_scheme: Scheme::Unix,
            tls: TlsMode::None,
            cert_file: None,
            key_file: None,
            ca_file: None,
            ready_timeout_ms: 20_000,
            stop_timeout_ms: 10_000,
            data_root: None,
        }
    }
}

/// `[client]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Dial timeout for each request
    pub dial_timeout_ms: u64,
    /// Require quorum for reads and writes
    pub quorum: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 7_000,
            quorum: true,
        }
    }
}

/// `[convergence]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceSection {
    /// Expected cluster version; a full release version is reduced to major.minor
    pub target_version: String,
    /// Poll budget
    pub max_attempts: u32,
    /// Sleep between polls
    pub interval_ms: u64,
    /// Deadline for one status request
    pub request_timeout_ms: u64,
}

impl Default for ConvergenceSection {
    fn default() -> Self {
        Self {
            target_version: DEFAULT_TARGET_VERSION.to_string(),
            max_attempts: 7,
            interval_ms: 1_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// `[rolling]` / `[restart]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSection {
    /// Probe records seeded before any restart
    pub records: usize,
    /// Committed entries between snapshots
    pub snapshot_count: u64,
}

impl ScenarioSection {
    /// Defaults for a scenario kind
    #[must_use]
    pub fn for_kind(kind: ScenarioKind) -> Self {
        match kind {
            ScenarioKind::Rolling => Self {
                records: 5,
                snapshot_count: 3,
            },
            ScenarioKind::Restart => Self {
                records: 50,
                snapshot_count: 10,
            },
        }
    }
}

/// Scenario section as written, before per-kind defaults are filled in
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct PartialSection {
    records: Option<usize>,
    snapshot_count: Option<u64>,
}

impl PartialSection {
    fn resolve(self, kind: ScenarioKind) -> ScenarioSection {
        let defaults = ScenarioSection::for_kind(kind);
        ScenarioSection {
            records: self.records.unwrap_or(defaults.records),
            snapshot_count: self.snapshot_count.unwrap_or(defaults.snapshot_count),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    binaries: BinPaths,
    cluster: ClusterSection,
    client: ClientSection,
    convergence: ConvergenceSection,
    rolling: PartialSection,
    restart: PartialSection,
}

impl From<RawConfig> for HarnessConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            binaries: raw.binaries,
            cluster: raw.cluster,
            client: raw.client,
            convergence: raw.convergence,
            rolling: raw.rolling.resolve(ScenarioKind::Rolling),
            restart: raw.restart.resolve(ScenarioKind::Restart),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl HarnessConfig {
    /// Defaults for both scenarios
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML; missing keys take their defaults.
    ///
    /// # Errors
    /// [`ScenarioError::Config`] on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        toml::from_str(text).map_err(|e| ScenarioError::Config(e.to_string()))
    }

    /// Read `path` if given, then apply environment overrides.
    ///
    /// # Errors
    /// [`ScenarioError::Config`] when the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ScenarioError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ScenarioError::Config(format!("reading {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::new(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_BIN_DIR).filter(|d| !d.is_empty()) {
            self.binaries = BinPaths::from_dir(dir);
        }
        if let Some(target) = lookup(ENV_TARGET_VERSION).filter(|t| !t.is_empty()) {
            self.convergence.target_version = target;
        }
        self
    }

    /// With binaries
    #[must_use]
    pub fn with_binaries(mut self, binaries: BinPaths) -> Self {
        self.binaries = binaries;
        self
    }

    /// With convergence target
    #[must_use]
    pub fn with_target_version(mut self, target: impl Into<String>) -> Self {
        self.convergence.target_version = target.into();
        self
    }

    /// With convergence budget
    #[must_use]
    pub fn with_convergence_budget(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.convergence.max_attempts = max_attempts;
        self.convergence.interval_ms = duration_ms(interval);
        self
    }

    /// With cluster size
    #[must_use]
    pub fn with_cluster_size(mut self, size: usize) -> Self {
        self.cluster.size = size;
        self
    }

    /// With first client port
    #[must_use]
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.cluster.base_port = port;
        self
    }

    /// With data root
    #[must_use]
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cluster.data_root = Some(root.into());
        self
    }

    /// With record count for one scenario
    #[must_use]
    pub fn with_records(mut self, kind: ScenarioKind, records: usize) -> Self {
        self.scenario_mut(kind).records = records;
        self
    }

    /// Section for one scenario
    #[must_use]
    pub fn scenario(&self, kind: ScenarioKind) -> &ScenarioSection {
        match kind {
            ScenarioKind::Rolling => &self.rolling,
            ScenarioKind::Restart => &self.restart,
        }
    }

    fn scenario_mut(&mut self, kind: ScenarioKind) -> &mut ScenarioSection {
        match kind {
            ScenarioKind::Rolling => &mut self.rolling,
            ScenarioKind::Restart => &mut self.restart,
        }
    }

    fn tls_files(&self) -> Result<Option<TlsFiles>, ScenarioError> {
        if self.cluster.tls == TlsMode::None {
            return Ok(None);
        }
        match (&self.cluster.cert_file, &self.cluster.key_file, &self.cluster.ca_file) {
            (Some(cert), Some(key), Some(ca)) => Ok(Some(TlsFiles {
                cert_file: cert.clone(),
                key_file: key.clone(),
                ca_file: ca.clone(),
            })),
            _ => Err(ScenarioError::Config(format!(
                "tls mode {:?} requires cert_file, key_file and ca_file",
                self.cluster.tls
            ))),
        }
    }

    /// Launch descriptor for one scenario, starting at the released binary.
    ///
    /// # Errors
    /// [`ScenarioError::Config`] for an empty cluster or incomplete TLS files.
    pub fn cluster_config(&self, kind: ScenarioKind) -> Result<ClusterConfig, ScenarioError> {
        if self.cluster.size == 0 {
            return Err(ScenarioError::Config("cluster size must be at least 1".into()));
        }
        let mut config = ClusterConfig::no_tls()
            .with_version(BinaryVersion::LastRelease)
            .with_size(self.cluster.size)
            .with_snapshot_count(self.scenario(kind).snapshot_count)
            .with_base_scheme(self.cluster.base_scheme)
            .with_base_port(self.cluster.base_port)
            .with_tls(self.cluster.tls, self.tls_files()?)
            .with_timeouts(
                Duration::from_millis(self.cluster.ready_timeout_ms),
                Duration::from_millis(self.cluster.stop_timeout_ms),
            );
        if let Some(root) = &self.cluster.data_root {
            config = config.with_data_root(root);
        }
        Ok(config)
    }

    /// Client options, with client TLS when the cluster serves it
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default()
            .with_dial_timeout(Duration::from_millis(self.client.dial_timeout_ms))
            .with_consistency(Consistency::from_quorum(self.client.quorum));
        if self.cluster.tls.client_tls() {
            if let Ok(Some(files)) = self.tls_files() {
                options = options.with_tls(ClientTls {
                    ca_file: files.ca_file,
                    cert_file: files.cert_file,
                    key_file: files.key_file,
                });
            }
        }
        options
    }

    /// Convergence target and budget.
    ///
    /// The configured version may be a full release (`3.6.1`); the cluster
    /// only ever advertises major.minor, so that is what is polled for.
    #[must_use]
    pub fn convergence_target(&self) -> ConvergenceTarget {
        ConvergenceTarget::new(cluster_version(&self.convergence.target_version)).with_budget(
            self.convergence.max_attempts,
            Duration::from_millis(self.convergence.interval_ms),
        )
    }

    /// Deadline for one status request
    #[must_use]
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.convergence.request_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_both_scenarios() {
        let config = HarnessConfig::new();
        assert_eq!(config.cluster.size, 3);
        assert_eq!(config.cluster.base_port, 20000);
        assert_eq!(config.cluster.base_scheme, Scheme::Unix);
        assert_eq!(config.client.dial_timeout_ms, 7_000);
        assert!(config.client.quorum);
        assert_eq!(config.convergence.max_attempts, 7);
        assert_eq!(config.convergence.interval_ms, 1_000);
        assert_eq!(config.rolling, ScenarioSection { records: 5, snapshot_count: 3 });
        assert_eq!(config.restart, ScenarioSection { records: 50, snapshot_count: 10 });
    }

    #[test]
    fn empty_toml_equals_defaults() {
        assert_eq!(HarnessConfig::from_toml_str("").unwrap(), HarnessConfig::new());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [cluster]
            base_port = 31000
            base_scheme = "http"

            [restart]
            records = 20

            [convergence]
            target_version = "3.7"
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster.base_port, 31000);
        assert_eq!(config.cluster.base_scheme, Scheme::Http);
        assert_eq!(config.cluster.size, 3);
        assert_eq!(config.restart, ScenarioSection { records: 20, snapshot_count: 10 });
        assert_eq!(config.rolling, ScenarioSection { records: 5, snapshot_count: 3 });
        assert_eq!(config.convergence.target_version, "3.7");
        assert_eq!(config.convergence.max_attempts, 7);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = HarnessConfig::from_toml_str("[cluster\nsize = ").unwrap_err();
        assert!(matches!(err, ScenarioError::Config(_)));
    }

    #[test]
    fn environment_overrides_binaries_and_target() {
        let config = HarnessConfig::new().with_overrides(|key| match key {
            ENV_BIN_DIR => Some("/opt/etcd/bin".to_string()),
            ENV_TARGET_VERSION => Some("3.7".to_string()),
            _ => None,
        });
        assert_eq!(config.binaries.etcd_last_release, PathBuf::from("/opt/etcd/bin/etcd-last-release"));
        assert_eq!(config.binaries.etcdctl, PathBuf::from("/opt/etcd/bin/etcdctl"));
        assert_eq!(config.convergence.target_version, "3.7");
    }

    #[test]
    fn cluster_config_starts_at_last_release() {
        let config = HarnessConfig::new().cluster_config(ScenarioKind::Restart).unwrap();
        assert_eq!(config.version, BinaryVersion::LastRelease);
        assert_eq!(config.snapshot_count, 10);
        assert_eq!(config.cluster_size, 3);
    }

    #[test]
    fn tls_without_files_is_rejected() {
        let mut config = HarnessConfig::new();
        config.cluster.tls = TlsMode::All;
        assert!(matches!(
            config.cluster_config(ScenarioKind::Rolling),
            Err(ScenarioError::Config(_))
        ));
    }

    #[test]
    fn convergence_budget_builder() {
        let target = HarnessConfig::new()
            .with_target_version("3.6")
            .with_convergence_budget(3, Duration::from_millis(250))
            .convergence_target();
        assert_eq!(target.expected, "3.6");
        assert_eq!(target.max_attempts, 3);
        assert_eq!(target.interval, Duration::from_millis(250));
    }

    #[test]
    fn release_version_target_polls_for_major_minor() {
        let from_env = HarnessConfig::new().with_overrides(|key| {
            (key == ENV_TARGET_VERSION).then(|| "v3.6.1".to_string())
        });
        assert_eq!(from_env.convergence.target_version, "v3.6.1");
        assert_eq!(from_env.convergence_target().expected, "3.6");

        let target = HarnessConfig::new().with_target_version("3.7.0-rc.1").convergence_target();
        assert_eq!(target.expected, "3.7");
    }
}
