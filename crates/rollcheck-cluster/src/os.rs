//! Process control backed by real OS processes

use crate::config::NodeProcessConfig;
use crate::error::ClusterError;
use crate::process::{ProcessControl, ProcessHandle};
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Line the server prints on stderr once it accepts client traffic.
pub const READY_MARKER: &str = "ready to serve client requests";

/// Launches members as child processes of the harness
#[derive(Debug, Clone)]
pub struct OsProcessControl {
    ready_marker: String,
    ready_timeout: Duration,
    stop_timeout: Duration,
}

impl OsProcessControl {
    /// Create with explicit timeouts
    #[must_use]
    pub fn new(ready_timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            ready_marker: READY_MARKER.to_string(),
            ready_timeout,
            stop_timeout,
        }
    }

    /// Override the readiness marker
    #[must_use]
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    async fn clear_data_dir(config: &NodeProcessConfig) -> Result<(), ClusterError> {
        match tokio::fs::remove_dir_all(config.data_dir()).await {
            Ok(()) => {
                debug!(node = config.index(), dir = %config.data_dir().display(), "data directory cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClusterError::restart(
                config.index(),
                format!("clearing {}: {e}", config.data_dir().display()),
            )),
        }
    }
}

impl Default for OsProcessControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(20), Duration::from_secs(10))
    }
}

#[async_trait::async_trait]
impl ProcessControl for OsProcessControl {
    async fn start(&self, config: &NodeProcessConfig) -> Result<ProcessHandle, ClusterError> {
        let node = config.index();
        if !config.keep_data_dir() {
            Self::clear_data_dir(config).await?;
        }

        debug!(node, exec = %config.exec_path().display(), "launching process");
        let mut child = Command::new(config.exec_path())
            .args(config.args())
            .current_dir(config.work_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClusterError::restart(node, format!("spawn {}: {e}", config.exec_path().display()))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClusterError::restart(node, "stderr not captured"))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let name = config.name().to_string();
        let marker = self.ready_marker.clone();
        let output = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut ready_tx = Some(ready_tx);
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(node = %name, "{line}");
                if line.contains(&marker) {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        });

        let mut handle = ProcessHandle::starting(node, config.name()).with_child(child, Some(output));

        match tokio::time::timeout(self.ready_timeout, ready_rx).await {
            Ok(Ok(())) => {
                handle.mark_running()?;
                info!(node, pid = ?handle.pid(), "process ready");
                Ok(handle)
            }
            Ok(Err(_)) => {
                handle.mark_failed()?;
                Err(ClusterError::restart(node, "process exited before becoming ready"))
            }
            Err(_) => {
                handle.mark_failed()?;
                Err(ClusterError::restart(
                    node,
                    format!("not ready within {:?}", self.ready_timeout),
                ))
            }
        }
    }

    async fn stop(&self, handle: &mut ProcessHandle) -> Result<(), ClusterError> {
        let node = handle.node();
        if !handle.is_running() {
            return Ok(());
        }
        let Some(mut child) = handle.take_child() else {
            return handle.mark_stopped();
        };

        terminate(&mut child, node)?;

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(node, %status, "process exited");
                handle.mark_stopped()
            }
            Ok(Err(e)) => Err(ClusterError::stop(node, format!("wait: {e}"))),
            Err(_) => {
                warn!(node, timeout = ?self.stop_timeout, "process ignored SIGTERM, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ClusterError::stop(
                    node,
                    format!("did not exit within {:?}", self.stop_timeout),
                ))
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, node: usize) -> Result<(), ClusterError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // already reaped
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|_| ClusterError::stop(node, "pid out of range"))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ClusterError::stop(node, format!("SIGTERM: {e}"))),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, node: usize) -> Result<(), ClusterError> {
    child
        .start_kill()
        .map_err(|e| ClusterError::stop(node, format!("kill: {e}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{BinPaths, ClusterConfig};
    use std::path::Path;

    fn shell_node(script: &str, dir: &Path) -> NodeProcessConfig {
        let cfg = ClusterConfig::no_tls().with_size(1);
        let bins = BinPaths {
            etcd: "/bin/sh".into(),
            etcd_last_release: "/bin/sh".into(),
            etcdctl: "/bin/true".into(),
        };
        let mut node = cfg.node_configs(&bins, dir).remove(0);
        node.override_args(vec!["-c".to_string(), script.to_string()]);
        node
    }

    #[tokio::test]
    async fn start_waits_for_marker_and_stop_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let node = shell_node(&format!("echo '{READY_MARKER}' >&2; exec sleep 30"), dir.path());
        let control = OsProcessControl::new(Duration::from_secs(5), Duration::from_secs(5));

        let mut handle = control.start(&node).await.unwrap();
        assert!(handle.is_running());
        assert!(handle.pid().is_some());

        control.stop(&mut handle).await.unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn early_exit_is_a_restart_error() {
        let dir = tempfile::tempdir().unwrap();
        let node = shell_node("echo 'starting' >&2; exit 3", dir.path());
        let control = OsProcessControl::new(Duration::from_secs(5), Duration::from_secs(5));

        let err = control.start(&node).await.unwrap_err();
        assert!(matches!(err, ClusterError::ProcessRestart { node: 0, .. }));
    }

    #[tokio::test]
    async fn missing_marker_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let node = shell_node("exec sleep 30", dir.path());
        let control = OsProcessControl::new(Duration::from_millis(200), Duration::from_secs(5));

        let err = control.start(&node).await.unwrap_err();
        assert!(err.to_string().contains("not ready within"));
    }

    #[tokio::test]
    async fn stop_kills_process_that_ignores_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let node = shell_node(
            &format!("trap '' TERM; echo '{READY_MARKER}' >&2; while true; do sleep 1; done"),
            dir.path(),
        );
        let control = OsProcessControl::new(Duration::from_secs(5), Duration::from_millis(300));

        let mut handle = control.start(&node).await.unwrap();
        let err = control.stop(&mut handle).await.unwrap_err();
        assert!(matches!(err, ClusterError::ProcessStop { node: 0, .. }));
    }

    #[tokio::test]
    async fn launch_without_retention_clears_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let node = shell_node(&format!("echo '{READY_MARKER}' >&2; exec sleep 30"), dir.path());
        std::fs::create_dir_all(node.data_dir()).unwrap();
        std::fs::write(node.data_dir().join("member"), b"state").unwrap();

        let control = OsProcessControl::default();
        let mut handle = control.start(&node).await.unwrap();
        assert!(!node.data_dir().exists());
        control.stop(&mut handle).await.unwrap();
    }
}
