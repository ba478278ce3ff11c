//! Scenario orchestrators against the simulated cluster

use pretty_assertions::assert_eq;
use rollcheck_core::{Harness, ScenarioKind, ScenarioReport, Verdict};
use rollcheck_test_utils::{sim_bins, sim_config, SimBackend, SimCluster, SimEvent};
use std::sync::Arc;
use std::time::Duration;

fn harness(sim: &SimCluster) -> Harness {
    Harness::new(sim_config(), Arc::new(SimBackend::new(sim.clone())))
}

async fn run(sim: &SimCluster, kind: ScenarioKind) -> ScenarioReport {
    harness(sim).run(kind).await
}

fn failure(report: &ScenarioReport) -> (&str, bool) {
    match &report.verdict {
        Verdict::Failed {
            reason,
            correctness_violation,
        } => (reason.as_str(), *correctness_violation),
        other => panic!("expected failure, got {other}"),
    }
}

fn restarts(sim: &SimCluster) -> Vec<(usize, bool)> {
    sim.events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::Started {
                node,
                exec,
                keep_data,
            } if exec == sim_bins().etcd => Some((node, keep_data)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn rolling_upgrade_keeps_five_records_and_converges() {
    let sim = SimCluster::for_sim_bins();
    let report = run(&sim, ScenarioKind::Rolling).await;

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.records_seeded, 5);
    assert_eq!(report.nodes_upgraded, 3);
    assert_eq!(report.convergence_attempts, Some(1));

    // members upgraded one at a time, in index order, with data retained
    assert_eq!(restarts(&sim), vec![(0, true), (1, true), (2, true)]);
    // every record read back after each of the three restarts
    assert_eq!(sim.running_at_reads().len(), 15);
    for node in 0..3 {
        assert_eq!(sim.replica_value(node, "foo4").as_deref(), Some("bar"));
    }
    assert_eq!(sim.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn rolling_upgrade_stops_each_member_before_relaunching_it() {
    let sim = SimCluster::for_sim_bins();
    run(&sim, ScenarioKind::Rolling).await;

    let events = sim.events();
    for node in 0..3 {
        let stopped = events
            .iter()
            .position(|e| *e == SimEvent::Stopped { node })
            .unwrap();
        let relaunched = events
            .iter()
            .position(|e| {
                *e == SimEvent::Started {
                    node,
                    exec: sim_bins().etcd,
                    keep_data: true,
                }
            })
            .unwrap();
        assert!(stopped < relaunched);
        // the next member is not touched until this one has been verified
        if node < 2 {
            let next_stop = events
                .iter()
                .position(|e| *e == SimEvent::Stopped { node: node + 1 })
                .unwrap();
            let reads_between = events[relaunched..next_stop]
                .iter()
                .filter(|e| matches!(e, SimEvent::Get { .. }))
                .count();
            assert_eq!(reads_between, 5);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn rolling_upgrade_waits_for_version_negotiation() {
    let sim = SimCluster::for_sim_bins();
    sim.converge_after(3);
    let report = run(&sim, ScenarioKind::Rolling).await;

    assert!(report.passed());
    assert_eq!(report.convergence_attempts, Some(4));
}

#[tokio::test(start_paused = true)]
async fn release_version_target_converges_on_major_minor() {
    let sim = SimCluster::for_sim_bins();
    let harness = Harness::new(
        sim_config().with_target_version("3.6.1"),
        Arc::new(SimBackend::new(sim.clone())),
    );
    let report = harness.run(ScenarioKind::Rolling).await;

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.convergence_attempts, Some(1));
}

#[tokio::test(start_paused = true)]
async fn convergence_timeout_reports_last_version() {
    let sim = SimCluster::for_sim_bins();
    sim.never_converge();
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, correctness) = failure(&report);
    assert!(reason.contains("not reached after 7 attempts"), "{reason}");
    assert!(reason.contains("last observed: 3.5.0"), "{reason}");
    assert!(!correctness);
    assert_eq!(report.nodes_upgraded, 3);
    // the spent budget is still reported
    assert_eq!(report.convergence_attempts, Some(7));
    assert!(report.generate_text().contains("Convergence Attempts: 7"));
    assert_eq!(sim.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_status_surface_times_out() {
    let sim = SimCluster::for_sim_bins();
    sim.status_down();
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, _) = failure(&report);
    assert!(reason.contains("connection refused"), "{reason}");
    assert_eq!(report.convergence_attempts, Some(7));
}

#[tokio::test]
async fn lost_record_fails_with_key_and_node() {
    let sim = SimCluster::for_sim_bins();
    sim.drop_key_on_restart(1, "foo3");
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, correctness) = failure(&report);
    assert!(correctness);
    assert!(reason.contains("\"foo3\""), "{reason}");
    assert!(reason.contains("node #1"), "{reason}");
    assert!(reason.contains("key not found"), "{reason}");
    assert_eq!(report.nodes_upgraded, 2);
    // no member after the failing one was touched
    assert_eq!(restarts(&sim), vec![(0, true), (1, true)]);
    assert_eq!(sim.running(), 0);
}

#[tokio::test]
async fn changed_record_is_a_mismatch() {
    let sim = SimCluster::for_sim_bins();
    sim.corrupt_key_on_restart(0, "foo0", "baz");
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, correctness) = failure(&report);
    assert!(correctness);
    assert!(reason.contains("expected \"bar\", got \"baz\""), "{reason}");
    assert_eq!(report.nodes_upgraded, 1);
}

#[tokio::test]
async fn rejected_seed_write_fails_before_any_restart() {
    let sim = SimCluster::for_sim_bins();
    sim.reject_writes();
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, correctness) = failure(&report);
    assert!(correctness);
    assert!(reason.contains("\"foo0\""), "{reason}");
    assert_eq!(report.records_seeded, 0);
    assert!(restarts(&sim).is_empty());
    assert_eq!(sim.running(), 0);
}

#[tokio::test]
async fn failed_restart_names_the_member() {
    let sim = SimCluster::for_sim_bins();
    sim.fail_restart(2);
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, correctness) = failure(&report);
    assert!(!correctness);
    assert!(reason.starts_with("node #2: failed to restart process"), "{reason}");
    assert_eq!(report.nodes_upgraded, 2);
}

#[tokio::test]
async fn unkillable_member_fails_the_scenario() {
    let sim = SimCluster::for_sim_bins();
    sim.unkillable(0);
    let report = run(&sim, ScenarioKind::Rolling).await;

    let (reason, _) = failure(&report);
    assert!(reason.starts_with("node #0: failed to stop process"), "{reason}");
    assert_eq!(report.nodes_upgraded, 0);
}

#[tokio::test]
async fn missing_release_binary_skips_without_launching() {
    let sim = SimCluster::for_sim_bins();
    let backend = SimBackend::new(sim.clone()).without_binary(sim_bins().etcd_last_release);
    let harness = Harness::new(sim_config(), Arc::new(backend));

    for kind in ScenarioKind::ALL {
        let report = harness.run(kind).await;
        assert!(report.skipped(), "{}", report.generate_text());
        assert!(!report.failed());
        match &report.verdict {
            Verdict::Skipped { reason } => assert!(reason.contains("etcd-last-release")),
            other => panic!("expected skip, got {other}"),
        }
    }
    assert!(sim.events().is_empty());
}

#[tokio::test]
async fn concurrent_restart_keeps_fifty_records() {
    let sim = SimCluster::for_sim_bins();
    let report = run(&sim, ScenarioKind::Restart).await;

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.records_seeded, 50);
    assert_eq!(report.nodes_upgraded, 3);
    assert_eq!(report.convergence_attempts, None);

    let events = sim.events();
    let first_relaunch = events
        .iter()
        .position(|e| matches!(e, SimEvent::Started { keep_data: true, .. }))
        .unwrap();
    // every member is down before any comes back
    for node in 0..3 {
        let stopped = events
            .iter()
            .position(|e| *e == SimEvent::Stopped { node })
            .unwrap();
        assert!(stopped < first_relaunch);
    }

    let mut relaunched = restarts(&sim);
    relaunched.sort_unstable();
    assert_eq!(relaunched, vec![(0, true), (1, true), (2, true)]);
    for node in 0..3 {
        assert_eq!(sim.replica_value(node, "foo49").as_deref(), Some("bar"));
    }
}

#[tokio::test(start_paused = true)]
async fn verification_waits_for_the_slowest_restart() {
    let sim = SimCluster::for_sim_bins();
    sim.restart_delay(0, Duration::from_millis(500))
        .restart_delay(2, Duration::from_millis(200));
    let report = run(&sim, ScenarioKind::Restart).await;

    assert!(report.passed());
    // the single post-barrier read saw the whole cluster back
    assert_eq!(sim.running_at_reads(), vec![3]);
}

#[tokio::test]
async fn concurrent_restart_failure_skips_verification() {
    let sim = SimCluster::for_sim_bins();
    sim.fail_restart(1);
    let report = run(&sim, ScenarioKind::Restart).await;

    let (reason, _) = failure(&report);
    assert!(reason.starts_with("node #1: failed to restart process"), "{reason}");
    assert_eq!(report.nodes_upgraded, 2);
    assert!(sim.running_at_reads().is_empty());
    assert_eq!(sim.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_all_reports_both_scenarios_in_order() {
    let sim = SimCluster::for_sim_bins();
    let reports = harness(&sim).run_all().await;

    let kinds: Vec<ScenarioKind> = reports.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ScenarioKind::Rolling, ScenarioKind::Restart]);
    assert!(reports.iter().all(ScenarioReport::passed));
    assert_ne!(reports[0].id, reports[1].id);
}
