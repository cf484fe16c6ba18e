//! Consistency predicates over a [`ClusterSnapshot`].
//!
//! Every predicate is pure and returns a [`Check`] naming itself and,
//! on failure, the offending value.

use std::fmt;

use crate::topology::ClusterSnapshot;
use crate::types::{LinkStatus, Role};

/// Outcome of one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub predicate: &'static str,
    failure: Option<String>,
}

impl Check {
    pub fn pass(predicate: &'static str) -> Self {
        Self {
            predicate,
            failure: None,
        }
    }

    pub fn fail(predicate: &'static str, reason: impl Into<String>) -> Self {
        Self {
            predicate,
            failure: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// Why the predicate failed, or `None` if it passed.
    pub fn reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "{}: ok", self.predicate),
            Some(reason) => write!(f, "{}: {reason}", self.predicate),
        }
    }
}

/// The reporting monitor plus the ones it knows can reach the quorum.
pub fn quorum_satisfied(snapshot: &ClusterSnapshot) -> Check {
    const NAME: &str = "quorum_satisfied";
    let q = snapshot.quorum;
    if q.achievable() {
        Check::pass(NAME)
    } else {
        Check::fail(
            NAME,
            format!(
                "quorum={} unreachable with {} known monitors (+1 self)",
                q.quorum_count, q.known_monitor_count
            ),
        )
    }
}

/// The master is a master, enough replicas exist, and all of them have
/// their replication link up.
pub fn replication_healthy(snapshot: &ClusterSnapshot, expected_replicas: usize) -> Check {
    const NAME: &str = "replication_healthy";
    let Some(master) = &snapshot.master else {
        return Check::fail(NAME, "no master discovered");
    };
    if master.role != Role::Master {
        return Check::fail(NAME, format!("master {} role={}", master.address, master.role));
    }
    if snapshot.replicas.len() < expected_replicas {
        return Check::fail(
            NAME,
            format!(
                "replica count {} below expected {expected_replicas}",
                snapshot.replicas.len()
            ),
        );
    }

    let bad: Vec<String> = snapshot
        .replicas
        .iter()
        .filter(|r| r.link_status != Some(LinkStatus::Up))
        .map(|r| {
            let status = r.link_status.unwrap_or(LinkStatus::Unknown);
            format!("replica {} linkStatus={status}", r.address)
        })
        .collect();

    if bad.is_empty() {
        Check::pass(NAME)
    } else {
        Check::fail(NAME, bad.join(", "))
    }
}

/// Enough monitors answer liveness probes, and a strict majority of the
/// ones that answer report at least one monitored master.
pub fn monitoring_healthy(snapshot: &ClusterSnapshot, expected_monitors: usize) -> Check {
    const NAME: &str = "monitoring_healthy";
    let responding = snapshot.reachable_monitors();
    if responding == 0 {
        return Check::fail(NAME, "no monitors responding");
    }
    if responding < expected_monitors {
        return Check::fail(
            NAME,
            format!("{responding} of {expected_monitors} monitors responding"),
        );
    }

    let reporting = snapshot
        .monitor_status
        .iter()
        .filter(|m| m.reachable && m.masters_reported > 0)
        .count();
    if reporting * 2 > responding {
        Check::pass(NAME)
    } else {
        Check::fail(
            NAME,
            format!("only {reporting} of {responding} responding monitors report a master"),
        )
    }
}

/// No node disagrees with the monitor tier about its role.
pub fn roles_consistent(snapshot: &ClusterSnapshot) -> Check {
    const NAME: &str = "roles_consistent";
    let mismatches: Vec<String> = snapshot.role_mismatches().map(|f| f.to_string()).collect();
    if mismatches.is_empty() {
        Check::pass(NAME)
    } else {
        Check::fail(NAME, mismatches.join("; "))
    }
}

/// All four predicates. The reason lists every failing predicate.
pub fn overall_health(
    snapshot: &ClusterSnapshot,
    expected_replicas: usize,
    expected_monitors: usize,
) -> Check {
    let checks = [
        quorum_satisfied(snapshot),
        replication_healthy(snapshot, expected_replicas),
        monitoring_healthy(snapshot, expected_monitors),
        roles_consistent(snapshot),
    ];
    let failures: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed())
        .map(Check::to_string)
        .collect();
    if failures.is_empty() {
        Check::pass("overall_health")
    } else {
        Check::fail("overall_health", failures.join("; "))
    }
}
