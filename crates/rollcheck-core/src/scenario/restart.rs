//! Concurrent full-cluster restart
//!
//! Seeds a larger record set, stops every member, then moves all of them onto
//! the binary under test at once. Verification waits on the join barrier, so
//! it never sees a cluster with only some members back.

use super::{teardown, Harness, Progress};
use crate::error::ScenarioError;
use crate::types::ScenarioKind;
use rollcheck_cluster::{ClusterHandle, LifecycleController};
use rollcheck_verify::KeyValueRecord;
use tracing::info;

pub(crate) async fn run(harness: &Harness, progress: &mut Progress) -> Result<(), ScenarioError> {
    let records = harness.records(ScenarioKind::Restart)?;
    let mut cluster = harness.launch(ScenarioKind::Restart).await?;
    let outcome = power_cycle(harness, &mut cluster, &records, progress).await;
    teardown(cluster, outcome).await
}

async fn power_cycle(
    harness: &Harness,
    cluster: &mut ClusterHandle,
    records: &[KeyValueRecord],
    progress: &mut Progress,
) -> Result<(), ScenarioError> {
    let verifier = harness.verifier(cluster)?;
    verifier.seed(records).await?;
    progress.records_seeded = records.len();

    let lifecycle = LifecycleController::for_cluster(cluster);
    for node in 0..cluster.len() {
        lifecycle.stop(cluster, node).await?;
    }
    info!(size = cluster.len(), "all nodes stopped");

    let group = lifecycle.spawn_upgrades(cluster, &harness.config().binaries.etcd);
    let summary = group.join(cluster).await;
    progress.nodes_upgraded = cluster.running_count();
    summary.into_result()?;

    // the barrier has passed: every member is back
    let probe = &records[..1];
    verifier
        .verify(probe)
        .await
        .map_err(|e| ScenarioError::from_verify(e, None))?;
    info!(key = probe[0].key(), "record survived full restart");
    Ok(())
}
