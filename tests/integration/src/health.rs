//! The single-shot health suite.

use vigil_core::{health, CheckResult};

use crate::helpers::{test_config, Harness};

async fn suite(h: &mut Harness) -> Vec<CheckResult> {
    health::run(&mut h.observer, &h.clock).await
}

fn find<'a>(results: &'a [CheckResult], name: &str) -> &'a CheckResult {
    results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no check named {name}"))
}

#[tokio::test]
async fn healthy_cluster_passes_everything() {
    let mut h = Harness::new(test_config());
    let results = suite(&mut h).await;

    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "monitor connectivity",
            "master monitoring",
            "replica monitoring",
            "monitor communication",
            "master connectivity",
            "quorum",
            "roles consistent",
            "replica read-only",
            "read/write replication",
        ]
    );
    for r in &results {
        assert!(r.passed, "{}: {:?}", r.name, r.reason);
    }
    assert!(h.control_log().is_empty());
    let cluster = h.cluster.borrow();
    assert!(cluster
        .nodes
        .iter()
        .all(|n| !n.data.contains_key("vigil:replication_test")));
}

#[tokio::test]
async fn writable_replica_is_flagged() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-replica-1").writable = true;
    let results = suite(&mut h).await;

    let check = find(&results, "replica read-only");
    assert!(!check.passed);
    assert_eq!(
        check.reason.as_deref(),
        Some("redis-replica-1 accepted a write")
    );
    let cluster = h.cluster.borrow();
    assert!(!cluster
        .node("redis-replica-1")
        .data
        .contains_key("vigil:readonly_test"));
}

#[tokio::test]
async fn down_monitor_is_named() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-sentinel-3").running = false;
    let results = suite(&mut h).await;

    let check = find(&results, "monitor connectivity");
    assert_eq!(check.reason.as_deref(), Some("unreachable: redis-sentinel-3"));
    assert!(find(&results, "master monitoring").passed);
}

#[tokio::test]
async fn no_monitors_fails_monitor_checks() {
    let mut h = Harness::new(test_config());
    for id in ["redis-sentinel-1", "redis-sentinel-2", "redis-sentinel-3"] {
        h.cluster.borrow_mut().node_mut(id).running = false;
    }
    let results = suite(&mut h).await;

    for name in ["master monitoring", "replica monitoring", "monitor communication"] {
        let check = find(&results, name);
        assert_eq!(check.reason.as_deref(), Some("no monitor reachable"), "{name}");
    }
    assert!(!find(&results, "quorum").passed);
    assert!(find(&results, "master connectivity").passed);
}

#[tokio::test]
async fn stopped_replica_breaks_replication() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-replica-2").running = false;
    let results = suite(&mut h).await;

    let check = find(&results, "master connectivity");
    assert_eq!(
        check.reason.as_deref(),
        Some("1 replicas connected, expected 2")
    );
    let check = find(&results, "read/write replication");
    assert!(!check.passed);
    assert!(check.reason.as_deref().unwrap().contains("redis-replica-2"));
}
