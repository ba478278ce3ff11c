//! Cluster and per-node launch configuration
//!
//! [`ClusterConfig`] is fixed for the lifetime of a scenario and is read by
//! every member launch. [`NodeProcessConfig`] is derived from it once per
//! member and afterwards only changes through the lifecycle controller when
//! a member is moved onto another binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port stride between consecutive members (client, peer, spare ports).
pub const PORT_STRIDE: u16 = 5;

/// Which of the two installed server binaries a cluster is launched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryVersion {
    /// The binary under test
    #[default]
    Current,
    /// The most recent released binary
    LastRelease,
}

/// Transport scheme used for peer URLs
///
/// Unix sockets keep parallel cluster instances from colliding on TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Unix domain sockets
    #[default]
    Unix,
    /// Plain TCP
    Http,
}

impl Scheme {
    /// URL scheme string, with the `s` suffix when TLS is on
    #[must_use]
    pub fn url_scheme(self, tls: bool) -> String {
        let base = match self {
            Scheme::Unix => "unix",
            Scheme::Http => "http",
        };
        if tls {
            format!("{base}s")
        } else {
            base.to_string()
        }
    }
}

/// TLS mode for client and peer traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// No TLS anywhere
    #[default]
    None,
    /// TLS on client traffic only
    Client,
    /// TLS on peer traffic only
    Peer,
    /// TLS on both
    All,
}

impl TlsMode {
    /// Whether client URLs use TLS
    #[inline]
    #[must_use]
    pub fn client_tls(self) -> bool {
        matches!(self, TlsMode::Client | TlsMode::All)
    }

    /// Whether peer URLs use TLS
    #[inline]
    #[must_use]
    pub fn peer_tls(self) -> bool {
        matches!(self, TlsMode::Peer | TlsMode::All)
    }
}

/// Certificate material shared by every member when TLS is on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// PEM certificate
    pub cert_file: PathBuf,
    /// PEM private key
    pub key_file: PathBuf,
    /// PEM CA bundle
    pub ca_file: PathBuf,
}

/// Locations of the server and client binaries on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinPaths {
    /// Server binary under test
    pub etcd: PathBuf,
    /// Last released server binary
    pub etcd_last_release: PathBuf,
    /// Command-line client
    pub etcdctl: PathBuf,
}

impl BinPaths {
    /// Conventional layout inside a single directory
    #[must_use]
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            etcd: dir.join("etcd"),
            etcd_last_release: dir.join("etcd-last-release"),
            etcdctl: dir.join("etcdctl"),
        }
    }

    /// Server binary for the given version
    #[inline]
    #[must_use]
    pub fn server(&self, version: BinaryVersion) -> &Path {
        match version {
            BinaryVersion::Current => &self.etcd,
            BinaryVersion::LastRelease => &self.etcd_last_release,
        }
    }
}

impl Default for BinPaths {
    fn default() -> Self {
        Self::from_dir("bin")
    }
}

/// Cluster-wide launch descriptor
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Binary every member starts with
    pub version: BinaryVersion,
    /// Number of members
    pub cluster_size: usize,
    /// Committed entries between snapshots
    pub snapshot_count: u64,
    /// Peer transport
    pub base_scheme: Scheme,
    /// First client port; member `i` uses `base_port + PORT_STRIDE * i`
    pub base_port: u16,
    /// TLS mode
    pub tls: TlsMode,
    /// Certificates, required unless `tls` is [`TlsMode::None`]
    pub tls_files: Option<TlsFiles>,
    /// Token shared by all members of one cluster
    pub initial_token: String,
    /// How long a launched member may take to report readiness
    pub ready_timeout: Duration,
    /// How long a signalled member may take to exit
    pub stop_timeout: Duration,
    /// Parent directory for the per-cluster temporary root
    pub data_root: Option<PathBuf>,
}

impl ClusterConfig {
    /// Three members, no TLS, unix peers
    #[must_use]
    pub fn no_tls() -> Self {
        Self::default()
    }

    /// With launch binary
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: BinaryVersion) -> Self {
        self.version = version;
        self
    }

    /// With member count
    #[inline]
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.cluster_size = size;
        self
    }

    /// With snapshot cadence
    #[inline]
    #[must_use]
    pub fn with_snapshot_count(mut self, count: u64) -> Self {
        self.snapshot_count = count;
        self
    }

    /// With peer transport
    #[inline]
    #[must_use]
    pub fn with_base_scheme(mut self, scheme: Scheme) -> Self {
        self.base_scheme = scheme;
        self
    }

    /// With first port
    #[inline]
    #[must_use]
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// With TLS mode and certificates
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, tls: TlsMode, files: Option<TlsFiles>) -> Self {
        self.tls = tls;
        self.tls_files = files;
        self
    }

    /// With timeouts
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, ready: Duration, stop: Duration) -> Self {
        self.ready_timeout = ready;
        self.stop_timeout = stop;
        self
    }

    /// With data root parent directory
    #[inline]
    #[must_use]
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Member name
    #[must_use]
    pub fn member_name(&self, index: usize) -> String {
        format!("infra{index}")
    }

    fn port(&self, index: usize, offset: u16) -> u32 {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        u32::from(self.base_port)
            .saturating_add(u32::from(PORT_STRIDE).saturating_mul(index))
            .saturating_add(u32::from(offset))
    }

    /// Client URL of a member; always TCP
    #[must_use]
    pub fn client_url(&self, index: usize) -> String {
        let scheme = if self.tls.client_tls() { "https" } else { "http" };
        format!("{scheme}://localhost:{}", self.port(index, 0))
    }

    /// Peer URL of a member, using the configured transport
    #[must_use]
    pub fn peer_url(&self, index: usize) -> String {
        format!(
            "{}://localhost:{}",
            self.base_scheme.url_scheme(self.tls.peer_tls()),
            self.port(index, 1)
        )
    }

    /// `--initial-cluster` value
    #[must_use]
    pub fn initial_cluster(&self) -> String {
        (0..self.cluster_size)
            .map(|i| format!("{}={}", self.member_name(i), self.peer_url(i)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Launch arguments for one member
    #[must_use]
    pub fn member_args(&self, index: usize, data_dir: &Path) -> Vec<String> {
        let client_url = self.client_url(index);
        let peer_url = self.peer_url(index);
        let mut args = vec![
            "--name".to_string(),
            self.member_name(index),
            "--listen-client-urls".to_string(),
            client_url.clone(),
            "--advertise-client-urls".to_string(),
            client_url,
            "--listen-peer-urls".to_string(),
            peer_url.clone(),
            "--initial-advertise-peer-urls".to_string(),
            peer_url,
            "--initial-cluster-token".to_string(),
            self.initial_token.clone(),
            "--data-dir".to_string(),
            data_dir.display().to_string(),
            "--snapshot-count".to_string(),
            self.snapshot_count.to_string(),
            "--initial-cluster".to_string(),
            self.initial_cluster(),
            "--initial-cluster-state".to_string(),
            "new".to_string(),
        ];

        if let Some(files) = &self.tls_files {
            let cert = files.cert_file.display().to_string();
            let key = files.key_file.display().to_string();
            let ca = files.ca_file.display().to_string();
            if self.tls.client_tls() {
                args.extend([
                    "--cert-file".to_string(),
                    cert.clone(),
                    "--key-file".to_string(),
                    key.clone(),
                    "--trusted-ca-file".to_string(),
                    ca.clone(),
                ]);
            }
            if self.tls.peer_tls() {
                args.extend([
                    "--peer-cert-file".to_string(),
                    cert,
                    "--peer-key-file".to_string(),
                    key,
                    "--peer-trusted-ca-file".to_string(),
                    ca,
                ]);
            }
        }

        args
    }

    /// Derive every member's launch descriptor under `root`
    #[must_use]
    pub fn node_configs(&self, bins: &BinPaths, root: &Path) -> Vec<NodeProcessConfig> {
        (0..self.cluster_size)
            .map(|index| {
                let data_dir = root.join(format!("{}.etcd", self.member_name(index)));
                NodeProcessConfig {
                    index,
                    name: self.member_name(index),
                    exec_path: bins.server(self.version).to_path_buf(),
                    keep_data_dir: false,
                    args: self.member_args(index, &data_dir),
                    data_dir,
                    work_dir: root.to_path_buf(),
                    client_url: self.client_url(index),
                    peer_url: self.peer_url(index),
                }
            })
            .collect()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            version: BinaryVersion::Current,
            cluster_size: 3,
            snapshot_count: 10_000,
            base_scheme: Scheme::Unix,
            base_port: 20_000,
            tls: TlsMode::None,
            tls_files: None,
            initial_token: "new".to_string(),
            ready_timeout: Duration::from_secs(20),
            stop_timeout: Duration::from_secs(10),
            data_root: None,
        }
    }
}

/// Launch descriptor owned by exactly one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProcessConfig {
    index: usize,
    name: String,
    exec_path: PathBuf,
    keep_data_dir: bool,
    data_dir: PathBuf,
    work_dir: PathBuf,
    client_url: String,
    peer_url: String,
    args: Vec<String>,
}

impl NodeProcessConfig {
    /// Member index
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Member name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binary the next launch will run
    #[inline]
    #[must_use]
    pub fn exec_path(&self) -> &Path {
        &self.exec_path
    }

    /// Whether the next launch reuses the on-disk state
    #[inline]
    #[must_use]
    pub fn keep_data_dir(&self) -> bool {
        self.keep_data_dir
    }

    /// Member data directory
    #[inline]
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Working directory for the process; unix peer sockets land here
    #[inline]
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Client URL
    #[inline]
    #[must_use]
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    /// Peer URL
    #[inline]
    #[must_use]
    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    /// Arguments passed after the binary
    #[inline]
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[cfg(test)]
    pub(crate) fn override_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    /// Point the next launch at another binary and keep the data directory.
    pub(crate) fn retarget(&mut self, exec_path: PathBuf) {
        self.exec_path = exec_path;
        self.keep_data_dir = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn urls_follow_port_stride() {
        let cfg = ClusterConfig::no_tls().with_base_scheme(Scheme::Unix);
        assert_eq!(cfg.client_url(0), "http://localhost:20000");
        assert_eq!(cfg.peer_url(0), "unix://localhost:20001");
        assert_eq!(cfg.client_url(2), "http://localhost:20010");
        assert_eq!(cfg.peer_url(2), "unix://localhost:20011");
    }

    #[test]
    fn tls_changes_schemes() {
        let cfg = ClusterConfig::no_tls()
            .with_base_scheme(Scheme::Http)
            .with_tls(TlsMode::All, None);
        assert!(cfg.client_url(1).starts_with("https://"));
        assert!(cfg.peer_url(1).starts_with("https://"));

        let cfg = cfg.with_tls(TlsMode::Peer, None);
        assert!(cfg.client_url(1).starts_with("http://"));
        assert!(cfg.peer_url(1).starts_with("https://"));
    }

    #[test]
    fn initial_cluster_lists_every_member() {
        let cfg = ClusterConfig::no_tls().with_size(3);
        assert_eq!(
            cfg.initial_cluster(),
            "infra0=unix://localhost:20001,infra1=unix://localhost:20006,infra2=unix://localhost:20011"
        );
    }

    #[test]
    fn node_configs_start_without_retention() {
        let cfg = ClusterConfig::no_tls().with_version(BinaryVersion::LastRelease);
        let bins = BinPaths::from_dir("/opt/etcd");
        let nodes = cfg.node_configs(&bins, Path::new("/tmp/cluster"));

        assert_eq!(nodes.len(), 3);
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.index(), i);
            assert_eq!(node.exec_path(), Path::new("/opt/etcd/etcd-last-release"));
            assert!(!node.keep_data_dir());
            assert_eq!(node.work_dir(), Path::new("/tmp/cluster"));
        }
        assert_eq!(nodes[1].data_dir(), Path::new("/tmp/cluster/infra1.etcd"));
    }

    #[test]
    fn retarget_forces_retention() {
        let cfg = ClusterConfig::no_tls();
        let mut node = cfg
            .node_configs(&BinPaths::default(), Path::new("/tmp/c"))
            .remove(0);
        node.retarget(PathBuf::from("/new/etcd"));
        assert_eq!(node.exec_path(), Path::new("/new/etcd"));
        assert!(node.keep_data_dir());
    }

    #[test]
    fn tls_args_only_when_files_present() {
        let cfg = ClusterConfig::no_tls().with_tls(TlsMode::Client, None);
        let args = cfg.member_args(0, Path::new("/d"));
        assert!(!args.iter().any(|a| a == "--cert-file"));

        let files = TlsFiles {
            cert_file: "c.pem".into(),
            key_file: "k.pem".into(),
            ca_file: "ca.pem".into(),
        };
        let cfg = cfg.with_tls(TlsMode::Client, Some(files));
        let args = cfg.member_args(0, Path::new("/d"));
        assert!(args.iter().any(|a| a == "--cert-file"));
        assert!(!args.iter().any(|a| a == "--peer-cert-file"));
    }

    proptest! {
        #[test]
        fn member_args_carry_name_and_data_dir(index in 0usize..16, snapshot in 1u64..100_000) {
            let cfg = ClusterConfig::no_tls().with_size(16).with_snapshot_count(snapshot);
            let dir = PathBuf::from(format!("/data/{index}"));
            let args = cfg.member_args(index, &dir);

            let value_of = |flag: &str| {
                args.iter()
                    .position(|a| a == flag)
                    .and_then(|i| args.get(i + 1))
                    .cloned()
            };
            prop_assert_eq!(value_of("--name"), Some(format!("infra{index}")));
            prop_assert_eq!(value_of("--data-dir"), Some(dir.display().to_string()));
            prop_assert_eq!(value_of("--snapshot-count"), Some(snapshot.to_string()));
            prop_assert_eq!(args.len() % 2, 0);
        }
    }
}
