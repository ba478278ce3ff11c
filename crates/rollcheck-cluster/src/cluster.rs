//! Cluster handle
//!
//! Owns every member's launch descriptor and process handle plus the
//! temporary directory their data lives in. Dropping the handle kills any
//! remaining children and removes the directory, so resources are released
//! on every exit path.

use crate::config::{BinPaths, ClusterConfig, NodeProcessConfig, TlsMode};
use crate::error::ClusterError;
use crate::process::{ProcessControl, ProcessHandle};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

/// One member: its launch descriptor and its current process, if any
#[derive(Debug)]
pub struct Member {
    pub(crate) config: NodeProcessConfig,
    pub(crate) process: Option<ProcessHandle>,
}

impl Member {
    /// Launch descriptor
    #[inline]
    #[must_use]
    pub fn config(&self) -> &NodeProcessConfig {
        &self.config
    }

    /// Current process handle
    #[inline]
    #[must_use]
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Member index
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.config.index()
    }

    /// Whether the member's process is serving
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(ProcessHandle::is_running)
    }
}

/// A running set of members sharing one cluster identity
#[derive(Debug)]
pub struct ClusterHandle {
    config: ClusterConfig,
    control: Arc<dyn ProcessControl>,
    members: Vec<Member>,
    // declared last: members are torn down before their directory goes away
    root: TempDir,
}

impl ClusterHandle {
    /// Launch every member and wait until all are ready.
    ///
    /// Members are launched concurrently since each one blocks until a
    /// quorum of peers is reachable.
    ///
    /// # Errors
    /// [`ClusterError::Setup`] when the configuration is unusable or any
    /// member fails to start. Members that did start are torn down first.
    pub async fn start(
        config: ClusterConfig,
        bins: &BinPaths,
        control: Arc<dyn ProcessControl>,
    ) -> Result<Self, ClusterError> {
        if config.cluster_size == 0 {
            return Err(ClusterError::Setup {
                reason: "cluster size must be at least 1".to_string(),
            });
        }
        if config.tls != TlsMode::None && config.tls_files.is_none() {
            return Err(ClusterError::Setup {
                reason: format!("tls mode {:?} requires certificate files", config.tls),
            });
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("rollcheck-");
        let root = match &config.data_root {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| ClusterError::Setup {
            reason: format!("creating data root: {e}"),
        })?;

        let configs = config.node_configs(bins, root.path());
        info!(
            size = config.cluster_size,
            version = ?config.version,
            root = %root.path().display(),
            "starting cluster"
        );

        let started = join_all(configs.iter().map(|c| control.start(c))).await;

        let mut members = Vec::with_capacity(configs.len());
        let mut first_error = None;
        for (node_config, result) in configs.into_iter().zip(started) {
            match result {
                Ok(handle) => members.push(Member {
                    config: node_config,
                    process: Some(handle),
                }),
                Err(e) => {
                    warn!(node = node_config.index(), error = %e, "member failed to start");
                    first_error.get_or_insert(e);
                    members.push(Member {
                        config: node_config,
                        process: None,
                    });
                }
            }
        }

        let mut cluster = Self {
            config,
            control,
            members,
            root,
        };

        if let Some(e) = first_error {
            if let Err(close_err) = cluster.stop_all().await {
                warn!(error = %close_err, "teardown after failed setup");
            }
            return Err(ClusterError::Setup {
                reason: e.to_string(),
            });
        }

        info!(size = cluster.len(), "cluster running");
        Ok(cluster)
    }

    /// Cluster descriptor
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Process control surface the cluster was started with
    #[inline]
    #[must_use]
    pub fn control(&self) -> Arc<dyn ProcessControl> {
        Arc::clone(&self.control)
    }

    /// Directory holding every member's data
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Number of members currently attached
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no members are attached
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All members in index order
    #[inline]
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Member by index
    ///
    /// # Errors
    /// [`ClusterError::NodeOutOfRange`] for an unknown index.
    pub fn member(&self, node: usize) -> Result<&Member, ClusterError> {
        let size = self.members.len();
        self.members
            .get(node)
            .ok_or(ClusterError::NodeOutOfRange { node, size })
    }

    pub(crate) fn member_mut(&mut self, node: usize) -> Result<&mut Member, ClusterError> {
        let size = self.members.len();
        self.members
            .get_mut(node)
            .ok_or(ClusterError::NodeOutOfRange { node, size })
    }

    /// Client URLs of every member
    #[must_use]
    pub fn client_urls(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.config.client_url().to_string())
            .collect()
    }

    /// Number of members currently serving
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_running()).count()
    }

    pub(crate) fn detach_members(&mut self) -> Vec<Member> {
        std::mem::take(&mut self.members)
    }

    pub(crate) fn attach_members(&mut self, mut members: Vec<Member>) {
        self.members.append(&mut members);
        self.members.sort_by_key(Member::index);
    }

    async fn stop_all(&mut self) -> Result<(), ClusterError> {
        let mut first_error = None;
        for member in &mut self.members {
            if let Some(handle) = member.process.as_mut() {
                if let Err(e) = self.control.stop(handle).await {
                    warn!(node = member.config.index(), error = %e, "stop during teardown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop every member and release the data directory.
    ///
    /// # Errors
    /// The first stop failure; remaining members are still stopped and the
    /// directory is still removed.
    pub async fn close(mut self) -> Result<(), ClusterError> {
        info!(size = self.len(), "closing cluster");
        self.stop_all().await
    }
}
