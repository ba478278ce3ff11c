//! Process lifecycle controller
//!
//! The only component that mutates a [`ClusterHandle`] after setup:
//! - `stop`: graceful termination of one member
//! - `upgrade_config`: point a member at another binary, keeping its data
//! - `restart`: launch a replacement process and wait for readiness
//!
//! [`RestartGroup`] fans the upgrade-and-restart step out over every member
//! and joins all of them before handing the cluster back.

use crate::cluster::{ClusterHandle, Member};
use crate::error::ClusterError;
use crate::process::ProcessControl;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Drives stop / reconfigure / restart on individual members
#[derive(Debug, Clone)]
pub struct LifecycleController {
    control: Arc<dyn ProcessControl>,
}

impl LifecycleController {
    /// Create over an explicit control surface
    #[must_use]
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self { control }
    }

    /// Create over the surface a cluster was started with
    #[must_use]
    pub fn for_cluster(cluster: &ClusterHandle) -> Self {
        Self::new(cluster.control())
    }

    /// Gracefully stop one member.
    ///
    /// # Errors
    /// [`ClusterError::ProcessStop`] when the process does not exit in time.
    pub async fn stop(&self, cluster: &mut ClusterHandle, node: usize) -> Result<(), ClusterError> {
        self.stop_member(cluster.member_mut(node)?).await
    }

    /// Point one member at `exec_path` and keep its data directory.
    ///
    /// # Errors
    /// [`ClusterError::NodeOutOfRange`] for an unknown index.
    pub fn upgrade_config(
        &self,
        cluster: &mut ClusterHandle,
        node: usize,
        exec_path: impl Into<PathBuf>,
    ) -> Result<(), ClusterError> {
        Self::upgrade_member(cluster.member_mut(node)?, exec_path);
        Ok(())
    }

    /// Launch a replacement process for one member and wait until it serves.
    ///
    /// # Errors
    /// [`ClusterError::ProcessRestart`] on launch failure or readiness timeout.
    pub async fn restart(
        &self,
        cluster: &mut ClusterHandle,
        node: usize,
    ) -> Result<(), ClusterError> {
        self.restart_member(cluster.member_mut(node)?).await
    }

    async fn stop_member(&self, member: &mut Member) -> Result<(), ClusterError> {
        let node = member.index();
        let Some(handle) = member.process.as_mut() else {
            debug!(node, "stop requested for member without a process");
            return Ok(());
        };
        info!(node, "stopping node");
        self.control.stop(handle).await?;
        info!(node, "stopped node");
        Ok(())
    }

    fn upgrade_member(member: &mut Member, exec_path: impl Into<PathBuf>) {
        let exec_path = exec_path.into();
        info!(node = member.index(), exec = %exec_path.display(), "retargeting node binary");
        member.config.retarget(exec_path);
    }

    async fn restart_member(&self, member: &mut Member) -> Result<(), ClusterError> {
        let node = member.index();
        info!(node, exec = %member.config.exec_path().display(), "restarting node");
        let replacement = match member.process.as_mut() {
            Some(old) => self.control.restart(old, &member.config).await,
            None => self.control.start(&member.config).await,
        };
        match replacement {
            Ok(handle) => {
                member.process = Some(handle);
                info!(node, "node restarted");
                Ok(())
            }
            Err(e) => {
                member.process = None;
                Err(e)
            }
        }
    }

    /// Detach every member and spawn one upgrade-and-restart task per member.
    ///
    /// Each task owns exactly one member, so no locking is needed. The
    /// cluster has no members attached until [`RestartGroup::join`] returns.
    #[must_use]
    pub fn spawn_upgrades(&self, cluster: &mut ClusterHandle, exec_path: &Path) -> RestartGroup {
        let members = cluster.detach_members();
        let mut tasks = JoinSet::new();
        for mut member in members {
            let controller = self.clone();
            let exec_path = exec_path.to_path_buf();
            tasks.spawn(async move {
                Self::upgrade_member(&mut member, exec_path);
                let result = controller.restart_member(&mut member).await;
                (member, result)
            });
        }
        let spawned = tasks.len();
        debug!(spawned, "restart tasks spawned");
        RestartGroup { tasks, spawned }
    }
}

/// Outcome of a joined [`RestartGroup`]
#[derive(Debug, Default)]
pub struct RestartSummary {
    /// Tasks spawned
    pub spawned: usize,
    /// Tasks that handed their member back, successfully restarted or not
    pub completed: usize,
    /// Per-member failures in index order
    pub failures: Vec<ClusterError>,
}

impl RestartSummary {
    /// Whether every member restarted
    #[inline]
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.completed == self.spawned && self.failures.is_empty()
    }

    /// First failure by member index
    ///
    /// # Errors
    /// The lowest-index failure when any member did not restart.
    pub fn into_result(mut self) -> Result<(), ClusterError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self.failures.remove(0))
        }
    }
}

/// A set of in-flight member restarts
///
/// Dropping the group without joining aborts the tasks; their members and
/// processes are dropped with them.
#[derive(Debug)]
pub struct RestartGroup {
    tasks: JoinSet<(Member, Result<(), ClusterError>)>,
    spawned: usize,
}

impl RestartGroup {
    /// Number of tasks still outstanding
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every task, success or failure, then reattach the members.
    pub async fn join(mut self, cluster: &mut ClusterHandle) -> RestartSummary {
        let mut members = Vec::with_capacity(self.spawned);
        let mut failures = Vec::new();
        let mut lost = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((member, result)) => {
                    if let Err(e) = result {
                        warn!(node = member.index(), error = %e, "concurrent restart failed");
                        failures.push(e);
                    }
                    members.push(member);
                }
                Err(e) => {
                    warn!(error = %e, "restart task did not complete");
                    lost.push(ClusterError::RestartTask(e.to_string()));
                }
            }
        }

        let completed = members.len();
        cluster.attach_members(members);
        failures.sort_by_key(|e| e.node().unwrap_or(usize::MAX));
        failures.extend(lost);

        info!(spawned = self.spawned, completed, failed = failures.len(), "restart barrier reached");
        RestartSummary {
            spawned: self.spawned,
            completed,
            failures,
        }
    }
}
