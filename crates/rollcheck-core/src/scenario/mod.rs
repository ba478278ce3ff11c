//! Scenario orchestrators
//!
//! Both strategies start from a cluster running the released binary with no
//! data and end in a [`Verdict`]:
//! - [`rolling`]: one member at a time, verifying every record after each restart
//! - [`restart`]: every member at once behind a join barrier, verifying afterwards
//!
//! The cluster is closed on every exit path; a failure during teardown only
//! fails a scenario that had otherwise passed.

pub mod restart;
pub mod rolling;

use crate::backend::Backend;
use crate::config::HarnessConfig;
use crate::error::ScenarioError;
use crate::types::{ScenarioId, ScenarioKind, ScenarioReport, Verdict};
use rollcheck_cluster::ClusterHandle;
use rollcheck_verify::{probe_records, ConvergencePoller, KeyValueRecord, Verifier};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Probe key prefix; records are `foo0`, `foo1`, ...
pub const KEY_PREFIX: &str = "foo";
/// Value written under every probe key
pub const PROBE_VALUE: &str = "bar";

/// Counters filled in as a scenario advances, reported even on failure
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Progress {
    pub(crate) nodes_upgraded: usize,
    pub(crate) records_seeded: usize,
    pub(crate) convergence_attempts: Option<u32>,
}

/// Runs scenarios against one [`Backend`]
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
    backend: Arc<dyn Backend>,
}

impl Harness {
    /// Create
    #[must_use]
    pub fn new(config: HarnessConfig, backend: Arc<dyn Backend>) -> Self {
        Self { config, backend }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Why scenarios cannot run on this host, if they cannot
    #[must_use]
    pub fn skip_reason(&self) -> Option<String> {
        let released = &self.config.binaries.etcd_last_release;
        if self.backend.binary_exists(released) {
            None
        } else {
            Some(format!("{} does not exist", released.display()))
        }
    }

    /// Run one scenario to its verdict
    pub async fn run(&self, kind: ScenarioKind) -> ScenarioReport {
        let id = ScenarioId::new();
        let started = Instant::now();
        let mut progress = Progress::default();

        let verdict = async {
            if let Some(reason) = self.skip_reason() {
                info!(%reason, "scenario skipped");
                return Verdict::Skipped { reason };
            }

            let outcome = match kind {
                ScenarioKind::Rolling => rolling::run(self, &mut progress).await,
                ScenarioKind::Restart => restart::run(self, &mut progress).await,
            };
            match outcome {
                Ok(()) => {
                    info!(elapsed = ?started.elapsed(), "scenario passed");
                    Verdict::Passed
                }
                Err(e) => {
                    error!(error = %e, node = ?e.node(), "scenario failed");
                    Verdict::Failed {
                        reason: e.to_string(),
                        correctness_violation: e.is_correctness_violation(),
                    }
                }
            }
        }
        .instrument(info_span!("scenario", %kind, %id))
        .await;

        ScenarioReport {
            id,
            kind,
            verdict,
            nodes_upgraded: progress.nodes_upgraded,
            records_seeded: progress.records_seeded,
            convergence_attempts: progress.convergence_attempts,
            elapsed: started.elapsed(),
        }
    }

    /// Run every scenario in order
    pub async fn run_all(&self) -> Vec<ScenarioReport> {
        let mut reports = Vec::with_capacity(ScenarioKind::ALL.len());
        for kind in ScenarioKind::ALL {
            reports.push(self.run(kind).await);
        }
        reports
    }

    fn records(&self, kind: ScenarioKind) -> Result<Vec<KeyValueRecord>, ScenarioError> {
        let count = self.config.scenario(kind).records;
        if count == 0 {
            return Err(ScenarioError::Config(format!(
                "{kind} scenario needs at least one record"
            )));
        }
        Ok(probe_records(KEY_PREFIX, count, PROBE_VALUE))
    }

    async fn launch(&self, kind: ScenarioKind) -> Result<ClusterHandle, ScenarioError> {
        let config = self.config.cluster_config(kind)?;
        let cluster = ClusterHandle::start(
            config,
            &self.config.binaries,
            self.backend.process_control(),
        )
        .await?;
        info!(size = cluster.len(), "cluster in old version running");
        Ok(cluster)
    }

    fn verifier(&self, cluster: &ClusterHandle) -> Result<Verifier, ScenarioError> {
        let options = self.config.client_options();
        let client = self.backend.kv_client(cluster, &options)?;
        Ok(Verifier::new(client, options.consistency))
    }

    fn poller(&self, cluster: &ClusterHandle) -> Result<ConvergencePoller, ScenarioError> {
        let source = self
            .backend
            .status_source(cluster, &self.config.client_options())?;
        Ok(ConvergencePoller::new(source))
    }
}

/// Close `cluster`, keeping the scenario's own error when there is one
async fn teardown(
    cluster: ClusterHandle,
    outcome: Result<(), ScenarioError>,
) -> Result<(), ScenarioError> {
    let closed = cluster.close().await;
    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "teardown after failure");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(close_err)) => Err(close_err.into()),
        (Ok(()), Ok(())) => Ok(()),
    }
}
