//! Scenario error taxonomy
//!
//! Every variant is fatal to the scenario that raised it. A missing release
//! binary is not an error at all; it surfaces as [`crate::Verdict::Skipped`].

use rollcheck_cluster::ClusterError;
use rollcheck_verify::{ConvergenceError, VerifyError};

/// Why a scenario failed
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Cluster failed to start
    #[error("cluster setup failed: {reason}")]
    Setup {
        /// Underlying failure
        reason: String,
    },

    /// A member did not terminate in time
    #[error("node #{node}: failed to stop process: {reason}")]
    ProcessStop {
        /// Member index
        node: usize,
        /// Underlying failure
        reason: String,
    },

    /// A member failed to launch or never became ready
    #[error("node #{node}: failed to restart process: {reason}")]
    ProcessRestart {
        /// Member index
        node: usize,
        /// Underlying failure
        reason: String,
    },

    /// A seed write was rejected or timed out
    #[error("write of key {key:?} failed: {reason}")]
    Write {
        /// Key being written
        key: String,
        /// Underlying failure
        reason: String,
    },

    /// A verification read could not be served at all
    #[error(
        "read of key {key:?} failed{}: {reason}",
        after_node.map(|n| format!(" after restarting node #{n}")).unwrap_or_default()
    )]
    Read {
        /// Key being read
        key: String,
        /// Member whose restart preceded the check
        after_node: Option<usize>,
        /// Underlying failure
        reason: String,
    },

    /// A record was read back with another value or not at all
    #[error(
        "verification of key {key:?} failed{}: {reason}",
        after_node.map(|n| format!(" after restarting node #{n}")).unwrap_or_default()
    )]
    VerificationMismatch {
        /// Offending key
        key: String,
        /// Member whose restart preceded the check
        after_node: Option<usize>,
        /// What was read instead
        reason: String,
    },

    /// The cluster never advertised the target version
    #[error(
        "cluster version {target:?} not reached after {attempts} attempts (last observed: {})",
        last_observed.as_deref().unwrap_or("nothing")
    )]
    ConvergenceTimeout {
        /// Expected cluster version
        target: String,
        /// Polls made
        attempts: u32,
        /// Last reported version or status failure
        last_observed: Option<String>,
    },

    /// Harness configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// A concurrent restart task panicked or was cancelled
    #[error("restart task failed: {0}")]
    TaskJoin(String),

    /// Member state machine was driven out of order
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl ScenarioError {
    /// Map a verifier failure, recording which restart preceded it
    #[must_use]
    pub fn from_verify(err: VerifyError, after_node: Option<usize>) -> Self {
        match err {
            VerifyError::Write { key, source } => Self::Write {
                key,
                reason: source.to_string(),
            },
            VerifyError::Read { key, source } => Self::Read {
                key,
                after_node,
                reason: source.to_string(),
            },
            VerifyError::Mismatch {
                key,
                expected,
                actual,
            } => Self::VerificationMismatch {
                key,
                after_node,
                reason: match actual {
                    Some(actual) => format!("expected {expected:?}, got {actual:?}"),
                    None => format!("expected {expected:?}, key not found"),
                },
            },
        }
    }

    /// Whether the cluster lost or refused data
    #[inline]
    #[must_use]
    pub fn is_correctness_violation(&self) -> bool {
        matches!(
            self,
            Self::Write { .. } | Self::Read { .. } | Self::VerificationMismatch { .. }
        )
    }

    /// Member index the failure is attributed to, if any
    #[must_use]
    pub fn node(&self) -> Option<usize> {
        match self {
            Self::ProcessStop { node, .. } | Self::ProcessRestart { node, .. } => Some(*node),
            Self::Read { after_node, .. } | Self::VerificationMismatch { after_node, .. } => {
                *after_node
            }
            _ => None,
        }
    }
}

impl From<ClusterError> for ScenarioError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Setup { reason } => Self::Setup { reason },
            ClusterError::ProcessStop { node, reason } => Self::ProcessStop { node, reason },
            ClusterError::ProcessRestart { node, reason } => Self::ProcessRestart { node, reason },
            ClusterError::RestartTask(reason) => Self::TaskJoin(reason),
            ClusterError::NodeOutOfRange { .. } => Self::Config(err.to_string()),
            ClusterError::IllegalTransition { .. } => Self::Lifecycle(err.to_string()),
            ClusterError::Io(e) => Self::Setup {
                reason: e.to_string(),
            },
        }
    }
}

impl From<ConvergenceError> for ScenarioError {
    fn from(err: ConvergenceError) -> Self {
        match err {
            ConvergenceError::Timeout {
                target,
                attempts,
                last_observed,
            } => Self::ConvergenceTimeout {
                target,
                attempts,
                last_observed,
            },
        }
    }
}

impl From<VerifyError> for ScenarioError {
    fn from(err: VerifyError) -> Self {
        Self::from_verify(err, None)
    }
}
