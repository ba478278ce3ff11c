//! Process handles and the process control surface
//!
//! A [`ProcessHandle`] follows a small state machine:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopped
//!               |
//!               +-----> Failed
//! ```
//!
//! A restart never revives a handle. It produces a fresh one bound to the
//! same [`NodeProcessConfig`].

use crate::config::NodeProcessConfig;
use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Lifecycle state of one member process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Not running
    Stopped,
    /// Launched, not yet serving
    Starting,
    /// Serving requests
    Running,
    /// Launch or readiness failed
    Failed,
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ProcessState) -> &'static [ProcessState] {
    use ProcessState::*;
    match from {
        Stopped => &[Starting],
        Starting => &[Running, Failed],
        Running => &[Stopped],
        Failed => &[],
    }
}

/// Validate a single state transition.
///
/// # Errors
/// [`ClusterError::IllegalTransition`] when `to` is not reachable from `from`.
pub fn validate_transition(from: ProcessState, to: ProcessState) -> Result<(), ClusterError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ClusterError::IllegalTransition { from, to })
    }
}

/// One member's OS-level process instance
pub struct ProcessHandle {
    node: usize,
    name: String,
    state: ProcessState,
    pid: Option<u32>,
    child: Option<Child>,
    output: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// New handle for a launch in progress
    #[must_use]
    pub fn starting(node: usize, name: impl Into<String>) -> Self {
        Self {
            node,
            name: name.into(),
            state: ProcessState::Starting,
            pid: None,
            child: None,
            output: None,
        }
    }

    /// Bind the spawned child and its output drain task
    #[must_use]
    pub fn with_child(mut self, child: Child, output: Option<JoinHandle<()>>) -> Self {
        self.pid = child.id();
        self.child = Some(child);
        self.output = output;
        self
    }

    /// Member index
    #[inline]
    #[must_use]
    pub fn node(&self) -> usize {
        self.node
    }

    /// Member name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// OS process id, when backed by a real child
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is serving
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    fn transition(&mut self, to: ProcessState) -> Result<(), ClusterError> {
        validate_transition(self.state, to)?;
        tracing::trace!(node = self.node, from = ?self.state, to = ?to, "process transition");
        self.state = to;
        Ok(())
    }

    /// Starting -> Running
    ///
    /// # Errors
    /// [`ClusterError::IllegalTransition`] from any other state.
    pub fn mark_running(&mut self) -> Result<(), ClusterError> {
        self.transition(ProcessState::Running)
    }

    /// Starting -> Failed
    ///
    /// # Errors
    /// [`ClusterError::IllegalTransition`] from any other state.
    pub fn mark_failed(&mut self) -> Result<(), ClusterError> {
        self.transition(ProcessState::Failed)
    }

    /// Running -> Stopped
    ///
    /// # Errors
    /// [`ClusterError::IllegalTransition`] from any other state.
    pub fn mark_stopped(&mut self) -> Result<(), ClusterError> {
        self.transition(ProcessState::Stopped)?;
        if let Some(output) = self.output.take() {
            output.abort();
        }
        Ok(())
    }

    /// Detach the child so the caller can signal and reap it
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("node", &self.node)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // children are spawned with kill_on_drop, so dropping `child` reaps it
        if let Some(output) = self.output.take() {
            output.abort();
        }
    }
}

/// Process control surface
///
/// The harness depends only on this contract, never on the server's
/// internal protocol.
#[async_trait::async_trait]
pub trait ProcessControl: Send + Sync + fmt::Debug {
    /// Launch a member and block until it is ready to serve.
    ///
    /// # Errors
    /// [`ClusterError::ProcessRestart`] on launch failure or readiness timeout.
    async fn start(&self, config: &NodeProcessConfig) -> Result<ProcessHandle, ClusterError>;

    /// Gracefully terminate a running member.
    ///
    /// # Errors
    /// [`ClusterError::ProcessStop`] when the process does not exit in time.
    async fn stop(&self, handle: &mut ProcessHandle) -> Result<(), ClusterError>;

    /// Stop `handle` if it is still running, then launch a replacement.
    ///
    /// # Errors
    /// Propagates [`ProcessControl::stop`] and [`ProcessControl::start`] failures.
    async fn restart(
        &self,
        handle: &mut ProcessHandle,
        config: &NodeProcessConfig,
    ) -> Result<ProcessHandle, ClusterError> {
        if handle.is_running() {
            self.stop(handle).await?;
        }
        self.start(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [ProcessState; 4] = [
        ProcessState::Stopped,
        ProcessState::Starting,
        ProcessState::Running,
        ProcessState::Failed,
    ];

    #[test]
    fn handle_walks_happy_path() {
        let mut handle = ProcessHandle::starting(0, "infra0");
        assert_eq!(handle.state(), ProcessState::Starting);
        handle.mark_running().unwrap();
        assert!(handle.is_running());
        handle.mark_stopped().unwrap();
        assert_eq!(handle.state(), ProcessState::Stopped);
    }

    #[test]
    fn failed_is_terminal() {
        let mut handle = ProcessHandle::starting(1, "infra1");
        handle.mark_failed().unwrap();
        assert!(handle.mark_running().is_err());
        assert!(handle.mark_stopped().is_err());
    }

    #[test]
    fn cannot_stop_before_running() {
        let mut handle = ProcessHandle::starting(0, "infra0");
        assert!(matches!(
            handle.mark_stopped(),
            Err(ClusterError::IllegalTransition {
                from: ProcessState::Starting,
                to: ProcessState::Stopped
            })
        ));
    }

    proptest! {
        #[test]
        fn validate_agrees_with_table(from in 0usize..4, to in 0usize..4) {
            let (from, to) = (ALL[from], ALL[to]);
            let ok = validate_transition(from, to).is_ok();
            prop_assert_eq!(ok, allowed_transitions(from).contains(&to));
        }
    }
}
