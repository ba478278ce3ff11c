//! Sequential rolling upgrade
//!
//! 1. Start the cluster at the released binary and seed the probe records.
//! 2. For each member in index order: stop it, point it at the binary under
//!    test with its data retained, restart it, then read back every record
//!    through the now mixed-version cluster.
//! 3. Poll the status surface until the cluster version converges.

use super::{teardown, Harness, Progress};
use crate::error::ScenarioError;
use crate::types::ScenarioKind;
use rollcheck_cluster::{ClusterHandle, LifecycleController};
use rollcheck_verify::{KeyValueRecord, Verifier};
use tracing::info;

pub(crate) async fn run(harness: &Harness, progress: &mut Progress) -> Result<(), ScenarioError> {
    let records = harness.records(ScenarioKind::Rolling)?;
    let mut cluster = harness.launch(ScenarioKind::Rolling).await?;
    let outcome = upgrade(harness, &mut cluster, &records, progress).await;
    teardown(cluster, outcome).await
}

async fn upgrade(
    harness: &Harness,
    cluster: &mut ClusterHandle,
    records: &[KeyValueRecord],
    progress: &mut Progress,
) -> Result<(), ScenarioError> {
    let verifier = harness.verifier(cluster)?;
    verifier.seed(records).await?;
    progress.records_seeded = records.len();

    let lifecycle = LifecycleController::for_cluster(cluster);
    let new_binary = harness.config().binaries.etcd.clone();

    for node in 0..cluster.len() {
        lifecycle.stop(cluster, node).await?;
        lifecycle.upgrade_config(cluster, node, new_binary.as_path())?;
        lifecycle.restart(cluster, node).await?;
        progress.nodes_upgraded += 1;

        verify_after(&verifier, records, node).await?;
    }

    info!("waiting for full upgrade");
    let polled = harness
        .poller(cluster)?
        .await_version(&harness.config().convergence_target())
        .await;
    progress.convergence_attempts = Some(match &polled {
        Ok(converged) => converged.attempts,
        Err(e) => e.attempts(),
    });
    polled?;
    Ok(())
}

async fn verify_after(
    verifier: &Verifier,
    records: &[KeyValueRecord],
    node: usize,
) -> Result<(), ScenarioError> {
    info!(node, records = records.len(), "testing reads after node restart");
    verifier
        .verify(records)
        .await
        .map_err(|e| ScenarioError::from_verify(e, Some(node)))?;
    info!(node, "tested reads after node restart");
    Ok(())
}
