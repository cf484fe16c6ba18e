//! Built-in scenarios against the simulated cluster.

use std::time::Duration;

use vigil_core::{scenarios, FailoverState, Orchestrator, ScenarioResult, Verdict};

use crate::helpers::{test_config, Harness};

async fn run(h: &mut Harness, name: &str) -> ScenarioResult {
    let mut scenario = scenarios::by_name(name).unwrap();
    let rx = h.interrupt.subscribe();
    let mut orchestrator = Orchestrator::new(&mut h.observer, &h.control, &h.clock, rx);
    orchestrator.run(scenario.as_mut()).await
}

fn states(result: &ScenarioResult) -> Vec<(FailoverState, FailoverState)> {
    result.transitions.iter().map(|t| (t.from, t.to)).collect()
}

#[tokio::test]
async fn failover_promotes_a_replica() {
    use FailoverState::*;

    let mut h = Harness::new(test_config());
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert_eq!(
        states(&result),
        vec![
            (Monitoring, SuspectedDown),
            (SuspectedDown, FailoverInProgress),
            (FailoverInProgress, NewMasterElected),
            (NewMasterElected, Stable),
        ]
    );
    assert_eq!(
        h.control_log(),
        vec![
            "update redis-master no",
            "stop redis-master",
            "update redis-master unless-stopped",
            "start redis-master",
        ]
    );

    let times: Vec<u64> = result.transitions.iter().map(|t| t.at.as_secs()).collect();
    assert_eq!(times, vec![1, 2, 3, 4]);

    let cluster = h.cluster.borrow();
    assert_eq!(cluster.master.to_string(), "redis-replica-1:6379");
    let old = cluster.node("redis-master");
    assert!(old.running);
    assert_eq!(old.upstream.as_ref().map(|a| a.to_string()).as_deref(), Some("redis-replica-1:6379"));
    // test keys are gone from every node
    for node in &cluster.nodes {
        assert!(!node.data.contains_key("failover_test"), "{}", node.id);
        assert!(!node.data.contains_key("vigil:write_probe"), "{}", node.id);
    }
}

#[tokio::test]
async fn old_master_rejoins_before_budget_runs_out() {
    use FailoverState::*;

    let mut cfg = test_config();
    cfg.timing.max_polls_per_state = 20;
    let mut h = Harness::new(cfg);
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    let at = |to: FailoverState| {
        result
            .transitions
            .iter()
            .find(|t| t.to == to)
            .map(|t| t.at)
            .unwrap()
    };
    // one poll after election, not twenty
    assert_eq!(at(Stable) - at(NewMasterElected), Duration::from_secs(1));
    assert!(result.elapsed < Duration::from_secs(10), "{:?}", result.elapsed);

    // restarted during the watch; restore found it running
    assert_eq!(h.count("start redis-master"), 1);
    assert_eq!(h.count("update redis-master unless-stopped"), 1);
}

#[tokio::test]
async fn failed_poll_keeps_partial_transition_log() {
    use FailoverState::*;

    let mut h = Harness::new(test_config());
    // monitors start sending garbage once the master is suspected down
    h.cluster.borrow_mut().corrupt_at_tick = Some(2);
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Failed);
    let reason = result.reason.clone().unwrap();
    assert!(reason.starts_with("watch:"), "{reason}");
    assert_eq!(states(&result), vec![(Monitoring, SuspectedDown)]);
    assert_eq!(h.count("start redis-master"), 1);
}

#[tokio::test]
async fn failover_log_is_deterministic() {
    let mut first = Harness::new(test_config());
    let mut second = Harness::new(test_config());
    let a = run(&mut first, "failover").await;
    let b = run(&mut second, "failover").await;
    assert_eq!(a.transitions, b.transitions);
    assert!(a.transitions.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test]
async fn failover_without_election_times_out() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().auto_failover = false;
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(
        result.transitions.last().map(|t| t.to),
        Some(FailoverState::TimedOut)
    );
    assert!(result.reason.unwrap().contains("TimedOut"));
    assert_eq!(h.count("start redis-master"), 1);
    assert!(h.cluster.borrow().node("redis-master").running);
}

#[tokio::test]
async fn failover_deadline_forces_timeout() {
    let mut cfg = test_config();
    cfg.timing.scenario_timeout_secs = 2;
    cfg.timing.max_polls_per_state = 100;
    let mut h = Harness::new(cfg);
    h.cluster.borrow_mut().auto_failover = false;
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Failed);
    let last = result.transitions.last().unwrap();
    assert_eq!(last.to, FailoverState::TimedOut);
    assert!(last.at >= Duration::from_secs(2));
}

#[tokio::test]
async fn failover_stop_error_still_restores() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().fail_stop = true;
    let result = run(&mut h, "failover").await;

    assert_eq!(result.verdict, Verdict::Failed);
    let reason = result.reason.unwrap();
    assert!(reason.contains("permission denied"), "{reason}");
    assert!(reason.starts_with("fault:"), "{reason}");
    assert_eq!(h.count("start redis-master"), 1);
    assert_eq!(h.count("update redis-master unless-stopped"), 1);
}

#[tokio::test]
async fn monitor_replicates_payload() {
    let mut h = Harness::new(test_config());
    let result = run(&mut h, "monitor").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert!(h.control_log().is_empty());
    let cluster = h.cluster.borrow();
    assert!(cluster.nodes.iter().all(|n| !n.data.contains_key("monitor_test")));
}

#[tokio::test]
async fn partition_keeps_quorum() {
    let mut h = Harness::new(test_config());
    let result = run(&mut h, "partition").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert_eq!(
        h.control_log(),
        vec!["stop redis-sentinel-1", "start redis-sentinel-1"]
    );
}

#[tokio::test]
async fn partition_waits_for_peers_to_notice() {
    let mut cfg = test_config();
    cfg.quorum = 3;
    let mut h = Harness::new(cfg);
    // peers flag a stopped monitor one tick after it goes away
    h.cluster.borrow_mut().monitor_detect_after = 1;
    let result = run(&mut h, "partition").await;

    assert_eq!(result.verdict, Verdict::Failed);
    let reason = result.reason.unwrap();
    assert!(reason.contains("quorum=3"), "{reason}");
    assert_eq!(h.count("start redis-sentinel-1"), 1);
}

#[tokio::test]
async fn partition_judged_after_settling() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().monitor_detect_after = 1;
    let result = run(&mut h, "partition").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert!(result.elapsed >= Duration::from_secs(2));
    let cluster = h.cluster.borrow();
    assert!(cluster.nodes.iter().all(|n| !n.data.contains_key("partition_test")));
}

#[tokio::test]
async fn sentinel_outage_keeps_monitoring() {
    let mut h = Harness::new(test_config());
    let result = run(&mut h, "sentinel").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert_eq!(
        h.control_log(),
        vec!["stop redis-sentinel-2", "start redis-sentinel-2"]
    );
}

#[tokio::test]
async fn partition_skipped_on_degraded_cluster() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-sentinel-3").running = false;
    let result = run(&mut h, "partition").await;

    assert_eq!(result.verdict, Verdict::Skipped);
    assert_eq!(h.count("stop"), 0);
}

#[tokio::test]
async fn recovery_restarts_stopped_nodes() {
    let mut h = Harness::new(test_config());
    {
        let mut cluster = h.cluster.borrow_mut();
        cluster.node_mut("redis-replica-2").running = false;
        cluster.node_mut("redis-sentinel-3").running = false;
    }
    let result = run(&mut h, "recovery").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert_eq!(
        h.control_log(),
        vec!["start redis-replica-2", "start redis-sentinel-3"]
    );
    let cluster = h.cluster.borrow();
    assert!(cluster.nodes.iter().all(|n| n.running));
}

#[tokio::test]
async fn stress_reads_back_every_write() {
    let mut h = Harness::new(test_config());
    let result = run(&mut h, "stress").await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.reason);
    assert!(result.elapsed >= Duration::from_secs(5));
    let cluster = h.cluster.borrow();
    for i in 0..10 {
        let key = format!("stress_test_{i}");
        assert!(cluster.nodes.iter().all(|n| !n.data.contains_key(&key)), "{key}");
    }
}

#[tokio::test]
async fn stress_fails_when_a_replica_is_detached() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-replica-2").upstream = None;
    let result = run(&mut h, "stress").await;

    assert_eq!(result.verdict, Verdict::Failed);
    let reason = result.reason.unwrap();
    assert!(reason.starts_with("0/10 writes replicated"), "{reason}");
}
