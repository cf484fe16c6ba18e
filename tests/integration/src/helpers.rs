//! Test helpers: an in-memory sentinel cluster and fake collaborators.
//!
//! [`FakeCluster`] models three data nodes and their monitors closely
//! enough to exercise the engine end to end. Clients, container control
//! and the clock all share one cluster through an `Rc<RefCell<_>>`;
//! advancing the [`ManualClock`] is what lets the simulated monitors
//! notice a stopped master and promote a replica.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use vigil_core::{
    Address, ClientError, Clock, ClusterConfig, ControlError, InfoMap, Observer, ProcessControl,
    RestartPolicy, Role, StoreClient, WriteOutcome,
};

pub type Shared = Rc<RefCell<FakeCluster>>;

pub struct FakeNode {
    pub id: String,
    pub role: Role,
    pub addr: Address,
    pub announced: Address,
    pub running: bool,
    pub upstream: Option<Address>,
    pub data: HashMap<String, String>,
    /// A misconfigured replica that takes writes.
    pub writable: bool,
    /// Clock ticks this node has been stopped for.
    pub down_ticks: u32,
}

pub struct FakeCluster {
    pub master_name: String,
    pub quorum: u32,
    pub nodes: Vec<FakeNode>,
    /// Where the monitors believe the master is.
    pub master: Address,
    /// Clock ticks the current master has been stopped for.
    pub down_ticks: u32,
    /// Ticks of master downtime before a replica is promoted.
    pub promote_after: u32,
    pub auto_failover: bool,
    /// Ticks a stopped monitor goes unnoticed by its peers.
    pub monitor_detect_after: u32,
    /// Makes the monitors report a non-numeric quorum.
    pub corrupt_quorum: bool,
    /// Sets `corrupt_quorum` once this many ticks have passed.
    pub corrupt_at_tick: Option<u32>,
    pub ticks: u32,
    pub fail_stop: bool,
    /// Every control call, e.g. `stop redis-master`.
    pub control_log: Vec<String>,
}

impl FakeCluster {
    /// A healthy cluster matching `config`: first master, replicas
    /// following it, every node running.
    pub fn from_config(config: &ClusterConfig) -> Shared {
        let master = config
            .master()
            .map(|m| m.announced().clone())
            .unwrap_or_else(|| "localhost:6379".parse().unwrap());
        let nodes = config
            .nodes
            .iter()
            .map(|spec| FakeNode {
                id: spec.id.clone(),
                role: spec.role,
                addr: spec.addr.clone(),
                announced: spec.announced().clone(),
                running: true,
                upstream: (spec.role == Role::Replica).then(|| master.clone()),
                data: HashMap::new(),
                writable: false,
                down_ticks: 0,
            })
            .collect();
        Rc::new(RefCell::new(FakeCluster {
            master_name: config.master_name.clone(),
            quorum: config.quorum,
            nodes,
            master,
            down_ticks: 0,
            promote_after: 2,
            auto_failover: true,
            monitor_detect_after: 0,
            corrupt_quorum: false,
            corrupt_at_tick: None,
            ticks: 0,
            fail_stop: false,
            control_log: Vec::new(),
        }))
    }

    pub fn node(&self, id: &str) -> &FakeNode {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .unwrap_or_else(|| panic!("no node {id}"))
    }

    pub fn node_mut(&mut self, id: &str) -> &mut FakeNode {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .unwrap_or_else(|| panic!("no node {id}"))
    }

    fn by_announced(&self, addr: &Address) -> Option<&FakeNode> {
        self.nodes
            .iter()
            .find(|n| n.role != Role::Monitor && &n.announced == addr)
    }

    fn master_running(&self) -> bool {
        self.by_announced(&self.master).is_some_and(|n| n.running)
    }

    /// One unit of simulated monitor time.
    pub fn tick(&mut self) {
        self.ticks += 1;
        if self.corrupt_at_tick.is_some_and(|at| self.ticks >= at) {
            self.corrupt_quorum = true;
        }
        for node in self.nodes.iter_mut().filter(|n| !n.running) {
            node.down_ticks += 1;
        }
        if self.master_running() {
            self.down_ticks = 0;
            return;
        }
        self.down_ticks += 1;
        if self.auto_failover && self.down_ticks >= self.promote_after {
            self.promote();
        }
    }

    fn promote(&mut self) {
        let Some(new) = self
            .nodes
            .iter()
            .find(|n| n.role == Role::Replica && n.running)
            .map(|n| n.announced.clone())
        else {
            return;
        };
        for node in self.nodes.iter_mut().filter(|n| n.role != Role::Monitor) {
            if node.announced == new {
                node.role = Role::Master;
                node.upstream = None;
            } else {
                node.role = Role::Replica;
                node.upstream = Some(new.clone());
            }
        }
        self.master = new;
        self.down_ticks = 0;
    }

    fn start(&mut self, id: &str) {
        let master = self.master.clone();
        let node = self.node_mut(id);
        node.running = true;
        node.down_ticks = 0;
        // a returning ex-master rejoins under the current master
        if node.role == Role::Master && node.announced != master {
            node.role = Role::Replica;
            node.upstream = Some(master);
        }
    }

    fn connected_replicas(&self, master: &Address) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.running && n.upstream.as_ref() == Some(master))
            .count()
    }

    fn master_flags(&self) -> &'static str {
        if self.master_running() || self.down_ticks == 0 {
            "master"
        } else {
            "master,s_down,o_down"
        }
    }

    fn master_record(&self) -> Vec<String> {
        let monitors = self.nodes.iter().filter(|n| n.role == Role::Monitor).count();
        let quorum = if self.corrupt_quorum {
            "two".to_string()
        } else {
            self.quorum.to_string()
        };
        tokens(&[
            ("name", self.master_name.clone()),
            ("ip", self.master.host.clone()),
            ("port", self.master.port.to_string()),
            ("flags", self.master_flags().to_string()),
            ("num-slaves", (self.data_nodes().count() - 1).to_string()),
            ("num-other-sentinels", (monitors - 1).to_string()),
            ("quorum", quorum),
        ])
    }

    fn data_nodes(&self) -> impl Iterator<Item = &FakeNode> {
        self.nodes.iter().filter(|n| n.role != Role::Monitor)
    }

    fn replica_records(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in self.data_nodes().filter(|n| n.announced != self.master) {
            let flags = if node.running { "slave" } else { "slave,s_down" };
            let link = if node.running { "ok" } else { "err" };
            out.extend(tokens(&[
                ("name", node.announced.to_string()),
                ("ip", node.announced.host.clone()),
                ("port", node.announced.port.to_string()),
                ("flags", flags.to_string()),
                ("master-link-status", link.to_string()),
                ("master-host", self.master.host.clone()),
                ("master-port", self.master.port.to_string()),
                ("slave-priority", "100".to_string()),
            ]));
        }
        out
    }

    fn monitor_records(&self, asking: &str) -> Vec<String> {
        let mut out = Vec::new();
        for node in self
            .nodes
            .iter()
            .filter(|n| n.role == Role::Monitor && n.id != asking)
        {
            let noticed = !node.running && node.down_ticks >= self.monitor_detect_after;
            let flags = if noticed { "sentinel,s_down" } else { "sentinel" };
            out.extend(tokens(&[
                ("name", node.id.clone()),
                ("ip", node.addr.host.clone()),
                ("port", node.addr.port.to_string()),
                ("flags", flags.to_string()),
            ]));
        }
        out
    }

    fn sentinel(&self, asking: &str, args: &[&str]) -> Result<Vec<String>, String> {
        let name_ok = args.get(2).is_some_and(|n| *n == self.master_name);
        match args.get(1).map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("masters") => Ok(self.master_record()),
            Some("master") if name_ok => Ok(self.master_record()),
            Some("replicas") | Some("slaves") if name_ok => Ok(self.replica_records()),
            Some("sentinels") if name_ok => Ok(self.monitor_records(asking)),
            Some("get-master-addr-by-name") if name_ok => {
                Ok(vec![self.master.host.clone(), self.master.port.to_string()])
            }
            Some("get-master-addr-by-name") => Ok(Vec::new()),
            _ => Err("ERR No such master with that name".into()),
        }
    }

    fn info(&self, node: &FakeNode) -> InfoMap {
        let mut info = InfoMap::new();
        match node.role {
            Role::Master => {
                info.insert("role".into(), "master".into());
                info.insert(
                    "connected_slaves".into(),
                    self.connected_replicas(&node.announced).to_string(),
                );
            }
            Role::Replica => {
                let upstream = node.upstream.clone().unwrap_or_else(|| self.master.clone());
                let up = self.by_announced(&upstream).is_some_and(|n| n.running);
                info.insert("role".into(), "slave".into());
                info.insert("master_host".into(), upstream.host.clone());
                info.insert("master_port".into(), upstream.port.to_string());
                info.insert(
                    "master_link_status".into(),
                    if up { "up" } else { "down" }.into(),
                );
                info.insert(
                    "master_last_io_seconds_ago".into(),
                    if up { "1" } else { "-1" }.into(),
                );
                info.insert("slave_priority".into(), "100".into());
            }
            Role::Monitor => {}
        }
        info
    }
}

fn tokens(pairs: &[(&str, String)]) -> Vec<String> {
    pairs
        .iter()
        .flat_map(|(k, v)| [k.to_string(), v.clone()])
        .collect()
}

/// A client for one node of a [`FakeCluster`].
pub struct FakeClient {
    id: String,
    address: Address,
    cluster: Shared,
}

impl FakeClient {
    fn check_running(&self) -> Result<(), ClientError> {
        if self.cluster.borrow().node(&self.id).running {
            Ok(())
        } else {
            Err(ClientError::Unreachable(
                self.address.clone(),
                "connection refused".into(),
            ))
        }
    }
}

#[async_trait(?Send)]
impl StoreClient for FakeClient {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn ping(&mut self) -> Result<(), ClientError> {
        self.check_running()
    }

    async fn info(&mut self, _section: &str) -> Result<InfoMap, ClientError> {
        self.check_running()?;
        let cluster = self.cluster.borrow();
        Ok(cluster.info(cluster.node(&self.id)))
    }

    async fn execute_raw(&mut self, args: &[&str]) -> Result<Vec<String>, ClientError> {
        self.check_running()?;
        let cluster = self.cluster.borrow();
        if cluster.node(&self.id).role != Role::Monitor || args.first() != Some(&"SENTINEL") {
            return Err(ClientError::Server(
                self.address.clone(),
                "ERR unknown command".into(),
            ));
        }
        cluster
            .sentinel(&self.id, args)
            .map_err(|e| ClientError::Server(self.address.clone(), e))
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<WriteOutcome, ClientError> {
        self.check_running()?;
        let mut cluster = self.cluster.borrow_mut();
        let node = cluster.node_mut(&self.id);
        if node.role == Role::Replica && !node.writable {
            return Ok(WriteOutcome::ReadOnlyRejected);
        }
        node.data.insert(key.into(), value.into());
        let is_master = node.role == Role::Master;
        let me = node.announced.clone();
        if is_master {
            for replica in cluster
                .nodes
                .iter_mut()
                .filter(|n| n.running && n.upstream.as_ref() == Some(&me))
            {
                replica.data.insert(key.into(), value.into());
            }
        }
        Ok(WriteOutcome::Accepted)
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError> {
        self.check_running()?;
        Ok(self.cluster.borrow().node(&self.id).data.get(key).cloned())
    }

    async fn del(&mut self, keys: &[&str]) -> Result<u64, ClientError> {
        self.check_running()?;
        let mut cluster = self.cluster.borrow_mut();
        let node = cluster.node_mut(&self.id);
        if node.role == Role::Replica && !node.writable {
            return Err(ClientError::Server(
                self.address.clone(),
                "READONLY You can't write against a read only replica.".into(),
            ));
        }
        let removed = keys.iter().filter(|k| node.data.remove(**k).is_some()).count();
        let is_master = node.role == Role::Master;
        let me = node.announced.clone();
        if is_master {
            for replica in cluster
                .nodes
                .iter_mut()
                .filter(|n| n.running && n.upstream.as_ref() == Some(&me))
            {
                for key in keys {
                    replica.data.remove(*key);
                }
            }
        }
        Ok(removed as u64)
    }
}

/// Container control over a [`FakeCluster`], logging every call.
pub struct FakeControl {
    pub cluster: Shared,
}

impl FakeControl {
    fn log(&self, entry: String) {
        self.cluster.borrow_mut().control_log.push(entry);
    }
}

#[async_trait(?Send)]
impl ProcessControl for FakeControl {
    async fn stop(&self, id: &str) -> Result<(), ControlError> {
        self.log(format!("stop {id}"));
        let mut cluster = self.cluster.borrow_mut();
        if cluster.fail_stop {
            return Err(ControlError::Failed {
                command: format!("docker stop {id}"),
                id: id.into(),
                stderr: "permission denied".into(),
            });
        }
        cluster.node_mut(id).running = false;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), ControlError> {
        self.log(format!("start {id}"));
        self.cluster.borrow_mut().start(id);
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool, ControlError> {
        Ok(self.cluster.borrow().node(id).running)
    }

    async fn set_restart_policy(&self, id: &str, policy: RestartPolicy) -> Result<(), ControlError> {
        self.log(format!("update {id} {}", policy.as_str()));
        Ok(())
    }
}

/// A clock that only moves when slept on. Each sleep ticks the cluster.
pub struct ManualClock {
    now: Cell<Duration>,
    cluster: Shared,
}

impl ManualClock {
    pub fn new(cluster: Shared) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            cluster,
        }
    }
}

#[async_trait(?Send)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        self.cluster.borrow_mut().tick();
    }
}

/// Default topology with a small poll budget.
pub fn test_config() -> ClusterConfig {
    let mut cfg = ClusterConfig::default();
    cfg.timing.max_polls_per_state = 5;
    cfg.timing.scenario_timeout_secs = 120;
    cfg
}

/// Everything one test needs, wired to the same cluster.
pub struct Harness {
    pub cluster: Shared,
    pub observer: Observer,
    pub control: FakeControl,
    pub clock: ManualClock,
    pub interrupt: watch::Sender<bool>,
}

impl Harness {
    pub fn new(config: ClusterConfig) -> Self {
        let cluster = FakeCluster::from_config(&config);
        let shared = cluster.clone();
        let observer = Observer::new(config, move |spec, _password| {
            Box::new(FakeClient {
                id: spec.id.clone(),
                address: spec.addr.clone(),
                cluster: shared.clone(),
            }) as Box<dyn StoreClient>
        });
        let (interrupt, _) = watch::channel(false);
        Self {
            control: FakeControl {
                cluster: cluster.clone(),
            },
            clock: ManualClock::new(cluster.clone()),
            cluster,
            observer,
            interrupt,
        }
    }

    pub fn control_log(&self) -> Vec<String> {
        self.cluster.borrow().control_log.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.control_log()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}
