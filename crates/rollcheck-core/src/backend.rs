//! Backend seam
//!
//! A [`Backend`] hands the orchestrators the three external surfaces they
//! drive: process control, the key-value client and the status surface.
//! [`EtcdBackend`] wires them to real binaries on the host.

use crate::config::HarnessConfig;
use crate::error::ScenarioError;
use rollcheck_cluster::{BinPaths, ClusterHandle, OsProcessControl, ProcessControl};
use rollcheck_verify::{
    ClientOptions, EtcdctlClient, HttpStatusSource, KvClient, StatusSource,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Source of the external surfaces a scenario drives
pub trait Backend: Send + Sync + fmt::Debug {
    /// Process control surface used to launch and restart members
    fn process_control(&self) -> Arc<dyn ProcessControl>;

    /// Key-value client against every member of `cluster`.
    ///
    /// # Errors
    /// [`ScenarioError::Setup`] when no client can be built.
    fn kv_client(
        &self,
        cluster: &ClusterHandle,
        options: &ClientOptions,
    ) -> Result<Arc<dyn KvClient>, ScenarioError>;

    /// Aggregate status surface of `cluster`.
    ///
    /// # Errors
    /// [`ScenarioError::Setup`] when no status client can be built.
    fn status_source(
        &self,
        cluster: &ClusterHandle,
        options: &ClientOptions,
    ) -> Result<Arc<dyn StatusSource>, ScenarioError>;

    /// Whether a binary is installed
    fn binary_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Real binaries: `etcd` members, `etcdctl` requests, HTTP `/version`
#[derive(Debug, Clone)]
pub struct EtcdBackend {
    bins: BinPaths,
    control: Arc<OsProcessControl>,
    status_timeout: Duration,
}

impl EtcdBackend {
    /// Create from explicit parts
    #[must_use]
    pub fn new(bins: BinPaths, control: OsProcessControl, status_timeout: Duration) -> Self {
        Self {
            bins,
            control: Arc::new(control),
            status_timeout,
        }
    }

    /// Create from harness configuration
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        let control = OsProcessControl::new(
            Duration::from_millis(config.cluster.ready_timeout_ms),
            Duration::from_millis(config.cluster.stop_timeout_ms),
        );
        Self::new(config.binaries.clone(), control, config.status_timeout())
    }
}

impl Backend for EtcdBackend {
    fn process_control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    fn kv_client(
        &self,
        cluster: &ClusterHandle,
        options: &ClientOptions,
    ) -> Result<Arc<dyn KvClient>, ScenarioError> {
        let endpoints = cluster.client_urls();
        if endpoints.is_empty() {
            return Err(ScenarioError::Setup {
                reason: "cluster has no client endpoints".into(),
            });
        }
        Ok(Arc::new(EtcdctlClient::new(
            self.bins.etcdctl.clone(),
            endpoints,
            options.clone(),
        )))
    }

    fn status_source(
        &self,
        cluster: &ClusterHandle,
        options: &ClientOptions,
    ) -> Result<Arc<dyn StatusSource>, ScenarioError> {
        let endpoint = cluster.members().first().ok_or_else(|| ScenarioError::Setup {
            reason: "cluster has no members".into(),
        })?;
        let ca_file = options.tls.as_ref().map(|tls| tls.ca_file.as_path());
        let source = HttpStatusSource::new(
            endpoint.config().client_url(),
            self.status_timeout,
            ca_file,
        )
        .map_err(|e| ScenarioError::Setup {
            reason: e.to_string(),
        })?;
        Ok(Arc::new(source))
    }
}
