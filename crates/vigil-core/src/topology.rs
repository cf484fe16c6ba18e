//! Topology model.
//!
//! A [`ClusterSnapshot`] joins what the monitor tier says about the
//! cluster with what each node says about itself. Disagreements between
//! the two are kept as [`Finding`]s rather than resolved silently, so the
//! evaluator can report them. Snapshots are rebuilt on every poll and
//! never mutated afterwards.

use std::fmt;
use std::time::Duration;

use crate::decode::{decode, decode_one};
use crate::error::DecodeError;
use crate::types::{Address, LinkStatus, NodeRecord, Role};

/// How many monitors must agree, and how many are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumConfig {
    /// Agreement threshold. Non-zero: the decoder rejects a reported
    /// quorum of 0 and config validation rejects a configured one.
    pub quorum_count: u32,
    /// Monitors known to the reporting monitor, excluding itself.
    pub known_monitor_count: u32,
}

impl QuorumConfig {
    pub fn new(quorum_count: u32, known_monitor_count: u32) -> Self {
        Self {
            quorum_count,
            known_monitor_count,
        }
    }

    /// The reporting monitor plus the ones it knows about can reach the
    /// threshold.
    pub fn achievable(&self) -> bool {
        self.known_monitor_count + 1 >= self.quorum_count
    }
}

/// Liveness of one configured monitor during a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub address: Address,
    pub reachable: bool,
    /// Number of masters the monitor reported watching.
    pub masters_reported: usize,
}

/// A disagreement or gap discovered while building a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// The monitor tier and the node itself disagree on the node's role.
    RoleMismatch {
        address: Address,
        monitor_role: Role,
        node_role: Role,
    },
    /// Neither the monitor tier nor any probed node reports a master.
    MasterUndiscoverable { master_name: String },
    /// The monitor tier and the replica disagree on the replication
    /// link. The monitor tier's value is the one kept on the snapshot.
    LinkStatusDisagreement {
        address: Address,
        monitor: LinkStatus,
        node: LinkStatus,
    },
    /// A configured node did not answer its direct probe.
    Unreachable {
        name: String,
        address: Address,
        reason: String,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::RoleMismatch {
                address,
                monitor_role,
                node_role,
            } => write!(
                f,
                "role mismatch at {address}: monitors report {monitor_role}, node reports {node_role}"
            ),
            Finding::MasterUndiscoverable { master_name } => {
                write!(f, "master '{master_name}' not found by monitors or probes")
            }
            Finding::LinkStatusDisagreement {
                address,
                monitor,
                node,
            } => write!(
                f,
                "link status disagreement at {address}: monitors report {monitor}, node reports {node}"
            ),
            Finding::Unreachable {
                name,
                address,
                reason,
            } => write!(f, "{name} ({address}) unreachable: {reason}"),
        }
    }
}

/// Raw material for one snapshot.
///
/// Replies are the flattened token streams of the monitor queries; an
/// empty master reply means no monitor answered. Probe records carry
/// each node's announced address so they line up with monitor records.
#[derive(Debug, Clone, Default)]
pub struct TopologyInputs {
    pub master_name: String,
    pub master_reply: Vec<String>,
    pub replicas_reply: Vec<String>,
    pub monitors_reply: Vec<String>,
    pub master_probe: Option<NodeRecord>,
    pub replica_probes: Vec<NodeRecord>,
    /// Used when the monitor tier did not report a quorum.
    pub configured_quorum: u32,
    pub monitor_status: Vec<MonitorStatus>,
    /// Nodes whose direct probe failed: `(name, address, reason)`.
    pub unreachable: Vec<(String, Address, String)>,
    pub captured_at: Duration,
}

/// One immutable view of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub master: Option<NodeRecord>,
    pub replicas: Vec<NodeRecord>,
    pub monitors: Vec<NodeRecord>,
    pub quorum: QuorumConfig,
    /// Time since the run started.
    pub captured_at: Duration,
    pub findings: Vec<Finding>,
    pub monitor_status: Vec<MonitorStatus>,
}

impl ClusterSnapshot {
    /// Address of the master, if one was discovered.
    pub fn master_address(&self) -> Option<&Address> {
        self.master.as_ref().map(|m| &m.address)
    }

    pub fn replica(&self, address: &Address) -> Option<&NodeRecord> {
        self.replicas.iter().find(|r| &r.address == address)
    }

    pub fn role_mismatches(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::RoleMismatch { .. }))
    }

    pub fn reachable_monitors(&self) -> usize {
        self.monitor_status.iter().filter(|m| m.reachable).count()
    }

    /// True when the master record carries a down flag.
    pub fn master_down(&self) -> bool {
        self.master.as_ref().is_some_and(NodeRecord::is_down)
    }
}

/// Builds a snapshot from monitor replies and direct probes.
///
/// Decoding errors in any monitor reply fail the whole build; the caller
/// reports them against the check or scenario phase that asked.
pub fn build(inputs: TopologyInputs) -> Result<ClusterSnapshot, DecodeError> {
    let TopologyInputs {
        master_name,
        master_reply,
        replicas_reply,
        monitors_reply,
        master_probe,
        replica_probes,
        configured_quorum,
        monitor_status,
        unreachable,
        captured_at,
    } = inputs;

    let monitor_master = if master_reply.is_empty() {
        None
    } else {
        Some(decode_one(&master_reply)?)
    };
    let monitor_replicas = dedup_by_address(decode(&replicas_reply)?);
    let monitors = dedup_by_address(decode(&monitors_reply)?);

    let probes: Vec<NodeRecord> = master_probe.into_iter().chain(replica_probes).collect();
    let mut findings = Vec::new();

    // role disagreement between the two views of the same address
    for probe in &probes {
        let seen = monitor_master
            .iter()
            .chain(monitor_replicas.iter())
            .find(|r| r.address == probe.address);
        if let Some(seen) = seen {
            if seen.role != probe.role {
                findings.push(Finding::RoleMismatch {
                    address: probe.address.clone(),
                    monitor_role: seen.role,
                    node_role: probe.role,
                });
            }
        }
    }

    let master = match monitor_master.clone().filter(|m| m.role == Role::Master) {
        Some(m) => Some(m),
        None => probes.iter().find(|p| p.role == Role::Master).cloned(),
    };
    if master.is_none() {
        findings.push(Finding::MasterUndiscoverable {
            master_name: master_name.clone(),
        });
    }

    let mut replicas = monitor_replicas;
    for probe in probes.iter().filter(|p| p.role == Role::Replica) {
        match replicas.iter_mut().find(|r| r.address == probe.address) {
            Some(existing) => merge_probe(existing, probe, &mut findings),
            None => {
                let is_master_addr = master.as_ref().is_some_and(|m| m.address == probe.address);
                if !is_master_addr {
                    replicas.push(probe.clone());
                }
            }
        }
    }

    for (name, address, reason) in unreachable {
        findings.push(Finding::Unreachable {
            name,
            address,
            reason,
        });
    }

    let quorum = quorum_config(monitor_master.as_ref(), &monitors, configured_quorum);

    Ok(ClusterSnapshot {
        master,
        replicas,
        monitors,
        quorum,
        captured_at,
        findings,
        monitor_status,
    })
}

/// Keeps the monitor tier's values, filling gaps from the probe.
fn merge_probe(existing: &mut NodeRecord, probe: &NodeRecord, findings: &mut Vec<Finding>) {
    match (existing.link_status, probe.link_status) {
        (Some(monitor), Some(node)) if monitor != node => {
            findings.push(Finding::LinkStatusDisagreement {
                address: existing.address.clone(),
                monitor,
                node,
            });
        }
        (None, Some(node)) => existing.link_status = Some(node),
        _ => {}
    }
    if existing.upstream.is_none() {
        existing.upstream = probe.upstream.clone();
    }
    if existing.last_io_age_secs.is_none() {
        existing.last_io_age_secs = probe.last_io_age_secs;
    }
    if existing.priority.is_none() {
        existing.priority = probe.priority;
    }
}

fn dedup_by_address(records: Vec<NodeRecord>) -> Vec<NodeRecord> {
    let mut out: Vec<NodeRecord> = Vec::with_capacity(records.len());
    for rec in records {
        if !out.iter().any(|r| r.address == rec.address) {
            out.push(rec);
        }
    }
    out
}

/// Counts the monitors still believed alive by the reporting monitor.
/// Falls back to the master record's counter, then zero.
fn quorum_config(
    master: Option<&NodeRecord>,
    monitors: &[NodeRecord],
    configured_quorum: u32,
) -> QuorumConfig {
    let quorum_count = master.and_then(|m| m.quorum).unwrap_or(configured_quorum);
    let known = if !monitors.is_empty() {
        monitors.iter().filter(|m| !m.is_down()).count() as u32
    } else {
        master.and_then(|m| m.other_monitors).unwrap_or(0)
    };
    QuorumConfig::new(quorum_count, known)
}
