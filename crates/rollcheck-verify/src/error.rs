//! Error types for verification and convergence

use std::time::Duration;

/// Failure talking to the key-value client surface
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// No member reachable within the dial timeout
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Cluster answered with an error
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Client produced output that could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Client binary could not be run
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read/write verification failures
///
/// All variants are correctness violations and fatal to the scenario.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// A seed write was rejected or timed out
    #[error("write of {key:?} failed: {source}")]
    Write {
        /// Key being written
        key: String,
        /// Underlying failure
        #[source]
        source: KvError,
    },

    /// A verification read failed outright
    #[error("read of {key:?} failed: {source}")]
    Read {
        /// Key being read
        key: String,
        /// Underlying failure
        #[source]
        source: KvError,
    },

    /// A read returned something other than what was written
    #[error("key {key:?}: expected {expected:?}, got {actual:?}")]
    Mismatch {
        /// Offending key
        key: String,
        /// Value written before any restart
        expected: String,
        /// Value read back; `None` when the key is gone
        actual: Option<String>,
    },
}

impl VerifyError {
    /// Key the failure is attributed to
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Write { key, .. } | Self::Read { key, .. } | Self::Mismatch { key, .. } => key,
        }
    }
}

/// Failure querying the cluster status surface
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Request could not be sent or completed
    #[error("status request failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("status endpoint returned {0}")]
    Status(u16),

    /// Body was not a version document
    #[error("undecodable status body: {0}")]
    Decode(String),

    /// No answer before the poll deadline
    #[error("status request timed out after {0:?}")]
    Timeout(Duration),
}

/// Version convergence failure
#[derive(Debug, thiserror::Error)]
pub enum ConvergenceError {
    /// Retry budget exhausted before the target version was advertised
    #[error(
        "cluster version {target:?} not reached after {attempts} attempts (last observed: {})",
        last_observed.as_deref().unwrap_or("nothing")
    )]
    Timeout {
        /// Expected cluster version
        target: String,
        /// Attempts made
        attempts: u32,
        /// Last reported cluster version or status failure
        last_observed: Option<String>,
    },
}

impl ConvergenceError {
    /// Polls made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. } => *attempts,
        }
    }
}
