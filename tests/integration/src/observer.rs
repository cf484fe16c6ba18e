//! Snapshot capture against the simulated cluster.

use std::time::Duration;

use vigil_core::{roles_consistent, DecodeError, Finding, LinkStatus, Role};

use crate::helpers::{test_config, Harness};

#[tokio::test]
async fn healthy_capture() {
    let mut h = Harness::new(test_config());
    let obs = h.observer.capture(Duration::from_secs(3)).await.unwrap();
    let snap = &obs.snapshot;

    assert_eq!(snap.master_address().unwrap().to_string(), "redis-master:6379");
    assert_eq!(obs.resolved_master.unwrap().to_string(), "redis-master:6379");
    assert_eq!(snap.replicas.len(), 2);
    assert!(snap
        .replicas
        .iter()
        .all(|r| r.link_status == Some(LinkStatus::Up) && r.role == Role::Replica));
    assert_eq!(snap.monitors.len(), 2);
    assert_eq!(snap.reachable_monitors(), 3);
    assert!(snap.monitor_status.iter().all(|m| m.masters_reported == 1));
    assert!(snap.quorum.achievable());
    assert!(snap.findings.is_empty(), "{:?}", snap.findings);
    assert_eq!(snap.captured_at, Duration::from_secs(3));
}

#[tokio::test]
async fn stopped_replica_is_a_finding() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().node_mut("redis-replica-2").running = false;
    let obs = h.observer.capture(Duration::ZERO).await.unwrap();
    let snap = &obs.snapshot;

    let replica = snap.replica(&"redis-replica-2:6379".parse().unwrap()).unwrap();
    assert_eq!(replica.link_status, Some(LinkStatus::Down));
    assert!(snap.findings.iter().any(|f| matches!(
        f,
        Finding::Unreachable { name, .. } if name == "redis-replica-2"
    )));
}

#[tokio::test]
async fn replica_claiming_master_is_a_mismatch() {
    let mut h = Harness::new(test_config());
    {
        let mut cluster = h.cluster.borrow_mut();
        let rogue = cluster.node_mut("redis-replica-2");
        rogue.role = Role::Master;
        rogue.upstream = None;
    }
    let obs = h.observer.capture(Duration::ZERO).await.unwrap();

    assert_eq!(obs.snapshot.role_mismatches().count(), 1);
    let check = roles_consistent(&obs.snapshot);
    assert!(!check.passed());
    // the monitor tier still names the real master
    assert_eq!(
        obs.snapshot.master_address().unwrap().to_string(),
        "redis-master:6379"
    );
}

#[tokio::test]
async fn malformed_monitor_reply_fails_capture() {
    let mut h = Harness::new(test_config());
    h.cluster.borrow_mut().corrupt_quorum = true;
    let err = h.observer.capture(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, DecodeError::NotNumeric { .. }), "{err}");
}

#[tokio::test]
async fn lost_monitors_lose_quorum() {
    let mut h = Harness::new(test_config());
    {
        let mut cluster = h.cluster.borrow_mut();
        cluster.node_mut("redis-sentinel-2").running = false;
        cluster.node_mut("redis-sentinel-3").running = false;
    }
    let obs = h.observer.capture(Duration::ZERO).await.unwrap();
    assert_eq!(obs.snapshot.reachable_monitors(), 1);
    assert!(!obs.snapshot.quorum.achievable());
}

#[tokio::test]
async fn write_probe_only_accepts_the_master() {
    let mut h = Harness::new(test_config());
    assert!(h.observer.write_probe(&"redis-master:6379".parse().unwrap()).await);
    assert!(!h.observer.write_probe(&"redis-replica-1:6379".parse().unwrap()).await);
    assert!(!h.observer.write_probe(&"elsewhere:6379".parse().unwrap()).await);
}

#[tokio::test]
async fn current_master_follows_promotion() {
    let mut h = Harness::new(test_config());
    assert_eq!(h.observer.current_master_id().await.as_deref(), Some("redis-master"));

    {
        let mut cluster = h.cluster.borrow_mut();
        cluster.node_mut("redis-master").running = false;
        cluster.tick();
        cluster.tick();
    }
    assert_eq!(
        h.observer.current_master_id().await.as_deref(),
        Some("redis-replica-1")
    );
}

#[tokio::test]
async fn no_monitors_falls_back_to_configured_master() {
    let mut h = Harness::new(test_config());
    for id in ["redis-sentinel-1", "redis-sentinel-2", "redis-sentinel-3"] {
        h.cluster.borrow_mut().node_mut(id).running = false;
    }
    assert!(h.observer.resolve_master().await.is_none());
    assert_eq!(h.observer.current_master_id().await.as_deref(), Some("redis-master"));

    let obs = h.observer.capture(Duration::ZERO).await.unwrap();
    // discovered from the direct probe alone
    assert_eq!(
        obs.snapshot.master_address().unwrap().to_string(),
        "redis-master:6379"
    );
    assert_eq!(obs.resolved_master, None);
}
