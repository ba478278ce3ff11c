//! Version convergence poller
//!
//! After a rolling upgrade the cluster version only moves once every member
//! runs the new binary and the leader has agreed to it. Polls the status
//! surface on a bounded budget until the advertised cluster version matches.

use crate::error::{ConvergenceError, StatusError};
use crate::retry::Retry;
use crate::status::{version_matches, StatusSource, VersionInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What convergence means for one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceTarget {
    /// Expected major.minor cluster version
    pub expected: String,
    /// Poll budget, at least one
    pub max_attempts: u32,
    /// Sleep between polls
    pub interval: Duration,
}

impl ConvergenceTarget {
    /// Seven polls one second apart
    #[must_use]
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            max_attempts: 7,
            interval: Duration::from_secs(1),
        }
    }

    /// With poll budget
    #[must_use]
    pub fn with_budget(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.interval = interval;
        self
    }
}

/// A successful convergence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    /// Polls made, including the matching one
    pub attempts: u32,
    /// Document that matched
    pub observed: VersionInfo,
}

#[derive(Debug)]
enum PollFailure {
    Behind(VersionInfo),
    Unreachable(StatusError),
}

impl PollFailure {
    fn describe(&self) -> String {
        match self {
            Self::Behind(info) => info.cluster.clone(),
            Self::Unreachable(e) => e.to_string(),
        }
    }
}

/// Polls a [`StatusSource`] until the cluster version matches
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    source: Arc<dyn StatusSource>,
}

impl ConvergencePoller {
    /// Create over a status surface
    #[must_use]
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self { source }
    }

    /// Poll until the advertised cluster version matches `target.expected`.
    ///
    /// Status errors count as unsuccessful attempts rather than aborting the
    /// poll, since a member may still be settling after its restart. Each
    /// query must answer within one interval, so the poll as a whole ends
    /// within `max_attempts * interval`.
    ///
    /// # Errors
    /// [`ConvergenceError::Timeout`] when the budget runs out, carrying the
    /// last observed version or status failure.
    pub async fn await_version(
        &self,
        target: &ConvergenceTarget,
    ) -> Result<Converged, ConvergenceError> {
        let retry = Retry::new(target.max_attempts, target.interval);
        info!(
            target = %target.expected,
            max_attempts = retry.max_attempts(),
            interval = ?retry.interval(),
            "waiting for cluster version"
        );

        let poll = |attempt: u32| async move {
            match self.source.version().await {
                Ok(info) if version_matches(&info.cluster, &target.expected) => Ok(info),
                Ok(info) => {
                    info!(attempt = attempt + 1, observed = %info.cluster, "cluster version behind");
                    Err(PollFailure::Behind(info))
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "status query failed");
                    Err(PollFailure::Unreachable(e))
                }
            }
        };
        let missed = |deadline: Duration| {
            warn!(?deadline, "status query did not answer in time");
            PollFailure::Unreachable(StatusError::Timeout(deadline))
        };

        let outcome = retry.run_paced(poll, missed).await;

        match outcome {
            Ok(done) => {
                info!(attempts = done.attempts, observed = %done.value.cluster, "cluster version converged");
                Ok(Converged {
                    attempts: done.attempts,
                    observed: done.value,
                })
            }
            Err(exhausted) => Err(ConvergenceError::Timeout {
                target: target.expected.clone(),
                attempts: exhausted.attempts,
                last_observed: Some(exhausted.last_error.describe()),
            }),
        }
    }
}
