//! Error types for cluster control

use crate::process::ProcessState;

/// Cluster and process control errors
///
/// Every variant is fatal to the scenario that raised it.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Cluster failed to come up
    #[error("cluster setup failed: {reason}")]
    Setup {
        /// What went wrong
        reason: String,
    },

    /// A member did not terminate
    #[error("node #{node}: failed to stop process: {reason}")]
    ProcessStop {
        /// Member index
        node: usize,
        /// What went wrong
        reason: String,
    },

    /// A member failed to launch or never became ready
    #[error("node #{node}: failed to restart process: {reason}")]
    ProcessRestart {
        /// Member index
        node: usize,
        /// What went wrong
        reason: String,
    },

    /// Process handle moved along an edge the state machine forbids
    #[error("illegal process transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: ProcessState,
        /// Requested state
        to: ProcessState,
    },

    /// Member index outside the cluster
    #[error("node #{node} out of range (cluster size {size})")]
    NodeOutOfRange {
        /// Requested index
        node: usize,
        /// Cluster size
        size: usize,
    },

    /// A concurrent restart task panicked or was cancelled
    #[error("restart task did not complete: {0}")]
    RestartTask(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Member index the error is attributed to, if any
    #[must_use]
    pub fn node(&self) -> Option<usize> {
        match self {
            Self::ProcessStop { node, .. }
            | Self::ProcessRestart { node, .. }
            | Self::NodeOutOfRange { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// Shorthand for a restart failure
    pub fn restart(node: usize, reason: impl Into<String>) -> Self {
        Self::ProcessRestart {
            node,
            reason: reason.into(),
        }
    }

    /// Shorthand for a stop failure
    pub fn stop(node: usize, reason: impl Into<String>) -> Self {
        Self::ProcessStop {
            node,
            reason: reason.into(),
        }
    }
}
