//! Live cluster observation.
//!
//! The [`Observer`] owns one client per configured node and turns a
//! round of queries into an [`Observation`]: monitor liveness, the
//! monitor tier's view of the master, its replicas and peers, and each
//! data node's own replication status. Nodes that fail to answer are
//! recorded, not raised.

use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{StoreClient, WriteOutcome};
use crate::config::{ClusterConfig, NodeSpec};
use crate::decode::{decode, probe_record};
use crate::error::{ClientError, DecodeError};
use crate::failover::Observation;
use crate::topology::{build, MonitorStatus, TopologyInputs};
use crate::types::{Address, NodeRecord, Role};

/// Key written by [`Observer::write_probe`].
pub const PROBE_KEY: &str = "vigil:write_probe";

struct NodeHandle {
    spec: NodeSpec,
    client: Box<dyn StoreClient>,
}

/// Queries the cluster on behalf of checks and scenarios.
pub struct Observer {
    config: ClusterConfig,
    data: Vec<NodeHandle>,
    monitors: Vec<NodeHandle>,
}

impl Observer {
    /// Creates one client per configured node with `connect`. Clients
    /// are expected to connect lazily, so this does no I/O.
    pub fn new<F>(config: ClusterConfig, mut connect: F) -> Self
    where
        F: FnMut(&NodeSpec, Option<&str>) -> Box<dyn StoreClient>,
    {
        let mut data = Vec::new();
        let mut monitors = Vec::new();
        for spec in &config.nodes {
            let password = config.credentials.for_role(spec.role);
            let handle = NodeHandle {
                spec: spec.clone(),
                client: connect(spec, password),
            };
            match spec.role {
                Role::Monitor => monitors.push(handle),
                Role::Master | Role::Replica => data.push(handle),
            }
        }
        Self {
            config,
            data,
            monitors,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Ids of the data nodes, in configuration order.
    pub fn data_ids(&self) -> Vec<String> {
        self.data.iter().map(|h| h.spec.id.clone()).collect()
    }

    /// Ids of the monitor nodes, in configuration order.
    pub fn monitor_ids(&self) -> Vec<String> {
        self.monitors.iter().map(|h| h.spec.id.clone()).collect()
    }

    /// The client for a node id, data or monitor.
    pub fn client(&mut self, id: &str) -> Option<&mut dyn StoreClient> {
        for handle in self.data.iter_mut().chain(self.monitors.iter_mut()) {
            if handle.spec.id == id {
                return Some(handle.client.as_mut());
            }
        }
        None
    }

    /// Runs one full round of queries.
    ///
    /// Only malformed replies fail; unreachable nodes become findings
    /// or non-reachable monitor statuses on the snapshot.
    pub async fn capture(&mut self, now: Duration) -> Result<Observation, DecodeError> {
        let master_name = self.config.master_name.clone();
        let mut monitor_status = Vec::with_capacity(self.monitors.len());
        let mut source: Option<usize> = None;

        for (idx, handle) in self.monitors.iter_mut().enumerate() {
            let address = handle.spec.addr.clone();
            let status = match handle.client.ping().await {
                Ok(()) => {
                    let masters = match handle.client.execute_raw(&["SENTINEL", "masters"]).await
                    {
                        Ok(flat) => decode(&flat)?.len(),
                        Err(e) => {
                            warn!(monitor = %handle.spec.id, error = %e, "SENTINEL masters failed");
                            0
                        }
                    };
                    source.get_or_insert(idx);
                    MonitorStatus {
                        address,
                        reachable: true,
                        masters_reported: masters,
                    }
                }
                Err(e) => {
                    debug!(monitor = %handle.spec.id, error = %e, "monitor unreachable");
                    MonitorStatus {
                        address,
                        reachable: false,
                        masters_reported: 0,
                    }
                }
            };
            monitor_status.push(status);
        }

        let mut inputs = TopologyInputs {
            master_name: master_name.clone(),
            configured_quorum: self.config.quorum,
            captured_at: now,
            ..Default::default()
        };
        let mut resolved_master = None;

        if let Some(idx) = source {
            let handle = &mut self.monitors[idx];
            let client = handle.client.as_mut();
            inputs.master_reply = query(client, &["SENTINEL", "master", master_name.as_str()]).await;
            inputs.replicas_reply = query(client, &["SENTINEL", "replicas", master_name.as_str()]).await;
            inputs.monitors_reply = query(client, &["SENTINEL", "sentinels", master_name.as_str()]).await;
            let addr_reply = query(
                client,
                &["SENTINEL", "get-master-addr-by-name", master_name.as_str()],
            )
            .await;
            resolved_master = parse_master_addr(&addr_reply);
            debug!(monitor = %handle.spec.id, resolved = ?resolved_master, "monitor view");
        } else {
            warn!("no monitor reachable");
        }

        inputs.monitor_status = monitor_status;

        for handle in &mut self.data {
            match probe(handle).await {
                Ok(record) => {
                    if handle.spec.role == Role::Master {
                        inputs.master_probe = Some(record);
                    } else {
                        inputs.replica_probes.push(record);
                    }
                }
                Err(ProbeError::Client(e)) => inputs.unreachable.push((
                    handle.spec.id.clone(),
                    handle.spec.announced().clone(),
                    e.to_string(),
                )),
                Err(ProbeError::Decode(e)) => return Err(e),
            }
        }

        let snapshot = build(inputs)?;
        Ok(Observation::new(snapshot, resolved_master))
    }

    /// Asks the first reachable monitor where the master currently is.
    pub async fn resolve_master(&mut self) -> Option<Address> {
        let master_name = self.config.master_name.clone();
        for handle in &mut self.monitors {
            if handle.client.ping().await.is_err() {
                continue;
            }
            let reply = query(
                handle.client.as_mut(),
                &["SENTINEL", "get-master-addr-by-name", master_name.as_str()],
            )
            .await;
            return parse_master_addr(&reply);
        }
        None
    }

    /// Id of the node currently acting as master: the one the monitor
    /// tier resolves to, else the configured master.
    pub async fn current_master_id(&mut self) -> Option<String> {
        if let Some(addr) = self.resolve_master().await {
            if let Some(spec) = self.config.data_node_announced_as(&addr) {
                return Some(spec.id.clone());
            }
            warn!(address = %addr, "resolved master is not a configured node");
        }
        self.config.master().map(|m| m.id.clone())
    }

    /// Checks that the node announced as `address` reports the master
    /// role and takes a test write.
    pub async fn write_probe(&mut self, address: &Address) -> bool {
        let Some(handle) = self
            .data
            .iter_mut()
            .find(|h| h.spec.announced() == address)
        else {
            warn!(address = %address, "write probe target is not a configured node");
            return false;
        };

        let role = match handle.client.info("replication").await {
            Ok(info) => info.get("role").cloned(),
            Err(e) => {
                debug!(node = %handle.spec.id, error = %e, "write probe: info failed");
                return false;
            }
        };
        if role.as_deref() != Some("master") {
            debug!(node = %handle.spec.id, role = ?role, "write probe: not a master");
            return false;
        }

        match handle.client.set(PROBE_KEY, &handle.spec.id).await {
            Ok(WriteOutcome::Accepted) => true,
            Ok(WriteOutcome::ReadOnlyRejected) => false,
            Err(e) => {
                debug!(node = %handle.spec.id, error = %e, "write probe: set failed");
                false
            }
        }
    }
}

enum ProbeError {
    Client(ClientError),
    Decode(DecodeError),
}

async fn probe(handle: &mut NodeHandle) -> Result<NodeRecord, ProbeError> {
    handle.client.ping().await.map_err(ProbeError::Client)?;
    let info = handle
        .client
        .info("replication")
        .await
        .map_err(ProbeError::Client)?;
    probe_record(&handle.spec.id, handle.spec.announced().clone(), &info).map_err(ProbeError::Decode)
}

/// Runs a monitor query, treating failure as an empty reply.
async fn query(client: &mut dyn StoreClient, args: &[&str]) -> Vec<String> {
    match client.execute_raw(args).await {
        Ok(flat) => flat,
        Err(e) => {
            warn!(address = %client.address(), command = ?args, error = %e, "monitor query failed");
            Vec::new()
        }
    }
}

/// `get-master-addr-by-name` answers `[host, port]`, or null when the
/// name is unknown.
fn parse_master_addr(reply: &[String]) -> Option<Address> {
    match reply {
        [host, port] => Address::new(host.as_str(), port.parse().ok()?),
        _ => None,
    }
}
