//! Single-shot health suite.
//!
//! Runs every check once against the live cluster and returns one
//! [`CheckResult`] per check. Nothing here injects faults.

use tracing::{debug, warn};

use crate::client::{Clock, WriteOutcome};
use crate::decode::{decode, decode_one};
use crate::evaluate::{quorum_satisfied, roles_consistent};
use crate::observer::Observer;
use crate::report::CheckResult;
use crate::types::NodeRecord;

const READONLY_KEY: &str = "vigil:readonly_test";
const REPLICATION_KEY: &str = "vigil:replication_test";

/// Runs the suite in order.
pub async fn run(observer: &mut Observer, clock: &dyn Clock) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(9);

    let (connectivity, monitor) = monitor_connectivity(observer).await;
    results.push(connectivity);

    match monitor {
        Some(id) => {
            results.push(master_monitoring(observer, &id).await);
            results.push(replica_monitoring(observer, &id).await);
            results.push(monitor_communication(observer, &id).await);
        }
        None => {
            for name in ["master monitoring", "replica monitoring", "monitor communication"] {
                results.push(CheckResult::fail(name, "no monitor reachable"));
            }
        }
    }

    let master = observer.current_master_id().await;
    results.push(master_connectivity(observer, master.as_deref()).await);

    match observer.capture(clock.now()).await {
        Ok(obs) => {
            results.push(CheckResult::from_check("quorum", &quorum_satisfied(&obs.snapshot)));
            results.push(CheckResult::from_check(
                "roles consistent",
                &roles_consistent(&obs.snapshot),
            ));
        }
        Err(e) => {
            let reason = format!("snapshot failed: {e}");
            results.push(CheckResult::fail("quorum", reason.clone()));
            results.push(CheckResult::fail("roles consistent", reason));
        }
    }

    match master {
        Some(master) => {
            let replicas: Vec<String> = observer
                .data_ids()
                .into_iter()
                .filter(|id| *id != master)
                .collect();
            results.push(replica_read_only(observer, &replicas).await);
            results.push(replication(observer, clock, &master, &replicas).await);
        }
        None => {
            results.push(CheckResult::fail("replica read-only", "no master configured"));
            results.push(CheckResult::fail("read/write replication", "no master configured"));
        }
    }

    results
}

/// Every monitor answers PING. Also returns the first one that did.
async fn monitor_connectivity(observer: &mut Observer) -> (CheckResult, Option<String>) {
    const NAME: &str = "monitor connectivity";
    let expected = observer.config().expected_monitors;
    let mut first = None;
    let mut down = Vec::new();

    for id in observer.monitor_ids() {
        let Some(client) = observer.client(&id) else {
            continue;
        };
        match client.ping().await {
            Ok(()) => {
                first.get_or_insert(id);
            }
            Err(e) => {
                debug!(monitor = %id, error = %e, "monitor ping failed");
                down.push(id);
            }
        }
    }

    let responding = observer.monitor_ids().len() - down.len();
    let result = if !down.is_empty() {
        CheckResult::fail(NAME, format!("unreachable: {}", down.join(", ")))
    } else if responding < expected {
        CheckResult::fail(NAME, format!("{responding} of {expected} monitors responding"))
    } else {
        CheckResult::pass(NAME)
    };
    (result, first)
}

/// Runs a monitor query and decodes the reply into records.
async fn monitor_records(
    observer: &mut Observer,
    monitor: &str,
    args: &[&str],
) -> Result<Vec<NodeRecord>, String> {
    let client = observer
        .client(monitor)
        .ok_or_else(|| format!("unknown node '{monitor}'"))?;
    let flat = client.execute_raw(args).await.map_err(|e| e.to_string())?;
    decode(&flat).map_err(|e| e.to_string())
}

/// The monitor tier watches the configured master name and flags it as
/// a master.
async fn master_monitoring(observer: &mut Observer, monitor: &str) -> CheckResult {
    const NAME: &str = "master monitoring";
    let master_name = observer.config().master_name.clone();
    let Some(client) = observer.client(monitor) else {
        return CheckResult::fail(NAME, format!("unknown node '{monitor}'"));
    };
    let flat = match client
        .execute_raw(&["SENTINEL", "master", master_name.as_str()])
        .await
    {
        Ok(flat) => flat,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };
    let record = match decode_one(&flat) {
        Ok(record) => record,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };

    if record.name != master_name {
        CheckResult::fail(
            NAME,
            format!("monitor reports '{}', expected '{master_name}'", record.name),
        )
    } else if !record.has_flag("master") {
        CheckResult::fail(NAME, format!("flags={}", record.flags_display()))
    } else {
        CheckResult::pass(NAME)
    }
}

async fn replica_monitoring(observer: &mut Observer, monitor: &str) -> CheckResult {
    const NAME: &str = "replica monitoring";
    let master_name = observer.config().master_name.clone();
    let expected = observer.config().expected_replicas;
    match monitor_records(observer, monitor, &["SENTINEL", "replicas", master_name.as_str()]).await
    {
        Ok(replicas) if replicas.len() >= expected => CheckResult::pass(NAME),
        Ok(replicas) => CheckResult::fail(
            NAME,
            format!("{} replicas monitored, expected {expected}", replicas.len()),
        ),
        Err(e) => CheckResult::fail(NAME, e),
    }
}

/// Each monitor sees the others.
async fn monitor_communication(observer: &mut Observer, monitor: &str) -> CheckResult {
    const NAME: &str = "monitor communication";
    let master_name = observer.config().master_name.clone();
    let expected = observer.config().expected_monitors.saturating_sub(1);
    match monitor_records(observer, monitor, &["SENTINEL", "sentinels", master_name.as_str()])
        .await
    {
        Ok(peers) if peers.len() >= expected => CheckResult::pass(NAME),
        Ok(peers) => CheckResult::fail(
            NAME,
            format!("{} other monitors known, expected {expected}", peers.len()),
        ),
        Err(e) => CheckResult::fail(NAME, e),
    }
}

/// The acting master answers, reports the master role and has its
/// replicas connected.
async fn master_connectivity(observer: &mut Observer, master: Option<&str>) -> CheckResult {
    const NAME: &str = "master connectivity";
    let expected = observer.config().expected_replicas;
    let Some(id) = master else {
        return CheckResult::fail(NAME, "no master configured");
    };
    let Some(client) = observer.client(id) else {
        return CheckResult::fail(NAME, format!("unknown node '{id}'"));
    };
    let info = match client.info("replication").await {
        Ok(info) => info,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };

    let role = info.get("role").map(String::as_str).unwrap_or("?");
    if role != "master" {
        return CheckResult::fail(NAME, format!("{id} role={role}"));
    }
    let connected: usize = info
        .get("connected_slaves")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if connected < expected {
        return CheckResult::fail(
            NAME,
            format!("{connected} replicas connected, expected {expected}"),
        );
    }
    CheckResult::pass(NAME)
}

/// Every replica refuses writes.
async fn replica_read_only(observer: &mut Observer, replicas: &[String]) -> CheckResult {
    const NAME: &str = "replica read-only";
    let mut writable = Vec::new();
    for id in replicas {
        let Some(client) = observer.client(id) else {
            continue;
        };
        match client.set(READONLY_KEY, "should_fail").await {
            Ok(WriteOutcome::ReadOnlyRejected) => {}
            Ok(WriteOutcome::Accepted) => {
                writable.push(format!("{id} accepted a write"));
                if let Err(e) = client.del(&[READONLY_KEY]).await {
                    warn!(node = %id, error = %e, "could not remove test key");
                }
            }
            Err(e) => writable.push(format!("{id}: {e}")),
        }
    }
    if writable.is_empty() {
        CheckResult::pass(NAME)
    } else {
        CheckResult::fail(NAME, writable.join(", "))
    }
}

/// A write to the master is readable from every replica after settling.
async fn replication(
    observer: &mut Observer,
    clock: &dyn Clock,
    master: &str,
    replicas: &[String],
) -> CheckResult {
    const NAME: &str = "read/write replication";
    let settle = observer.config().timing.settle();
    let value = format!("replication_test_{}", clock.now().as_millis());

    let Some(client) = observer.client(master) else {
        return CheckResult::fail(NAME, format!("unknown node '{master}'"));
    };
    match client.set(REPLICATION_KEY, &value).await {
        Ok(WriteOutcome::Accepted) => {}
        Ok(WriteOutcome::ReadOnlyRejected) => {
            return CheckResult::fail(NAME, format!("{master} is read-only"));
        }
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    }

    clock.sleep(settle).await;

    let mut missing = Vec::new();
    for id in replicas {
        let Some(client) = observer.client(id) else {
            continue;
        };
        match client.get(REPLICATION_KEY).await {
            Ok(Some(v)) if v == value => {}
            Ok(_) => missing.push(id.clone()),
            Err(e) => missing.push(format!("{id} ({e})")),
        }
    }

    if let Some(client) = observer.client(master) {
        if let Err(e) = client.del(&[REPLICATION_KEY]).await {
            warn!(node = %master, error = %e, "could not remove test key");
        }
    }

    if missing.is_empty() {
        CheckResult::pass(NAME)
    } else {
        CheckResult::fail(NAME, format!("not replicated to {}", missing.join(", ")))
    }
}
