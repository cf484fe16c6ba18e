//! Cluster configuration.
//!
//! Describes the nodes under test, their credentials, and the polling
//! budget. Resolution order is defaults, then an optional TOML file,
//! then command-line overrides applied by the binary.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Address, Role};

/// One node under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Container name, used for fault injection.
    pub id: String,
    pub role: Role,
    /// Where this tool connects.
    pub addr: Address,
    /// How the monitor tier names this node, when different from `addr`
    /// (e.g. a container hostname behind a published port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<Address>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, role: Role, addr: Address) -> Self {
        Self {
            id: id.into(),
            role,
            addr,
            announce: None,
        }
    }

    pub fn with_announce(mut self, announce: Address) -> Self {
        self.announce = Some(announce);
        self
    }

    /// The address to match against monitor replies.
    pub fn announced(&self) -> &Address {
        self.announce.as_ref().unwrap_or(&self.addr)
    }
}

/// Passwords per node role. Absent means no AUTH is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_password: Option<String>,
}

impl Credentials {
    pub fn for_role(&self, role: Role) -> Option<&str> {
        match role {
            Role::Master => self.master_password.as_deref(),
            Role::Replica => self.replica_password.as_deref(),
            Role::Monitor => self.monitor_password.as_deref(),
        }
    }
}

/// Polling cadence and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub poll_interval_ms: u64,
    pub max_polls_per_state: u32,
    pub scenario_timeout_secs: u64,
    pub command_timeout_ms: u64,
    /// Wait after writing before reading replicas back.
    pub settle_ms: u64,
    /// Pause between scenarios in an `all` run.
    pub scenario_gap_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_polls_per_state: 30,
            scenario_timeout_secs: 90,
            command_timeout_ms: 3000,
            settle_ms: 2000,
            scenario_gap_secs: 5,
        }
    }
}

impl Timing {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_secs(self.scenario_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn scenario_gap(&self) -> Duration {
        Duration::from_secs(self.scenario_gap_secs)
    }
}

/// The cluster under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name the monitor tier watches the master under.
    pub master_name: String,
    /// Used when the monitor tier does not report one.
    pub quorum: u32,
    pub expected_replicas: usize,
    pub expected_monitors: usize,
    pub credentials: Credentials,
    pub timing: Timing,
    pub nodes: Vec<NodeSpec>,
}

impl Default for ClusterConfig {
    /// Three data nodes and three monitors on localhost, announced under
    /// their container hostnames.
    fn default() -> Self {
        let local = |port| Address {
            host: "localhost".into(),
            port,
        };
        let named = |host: &str, port| Address {
            host: host.into(),
            port,
        };

        Self {
            master_name: "mymaster".into(),
            quorum: 2,
            expected_replicas: 2,
            expected_monitors: 3,
            credentials: Credentials {
                master_password: Some("redis_master_password_2024".into()),
                replica_password: Some("redis_replica_password_2024".into()),
                monitor_password: Some("redis_sentinel_password_2024".into()),
            },
            timing: Timing::default(),
            nodes: vec![
                NodeSpec::new("redis-master", Role::Master, local(6379))
                    .with_announce(named("redis-master", 6379)),
                NodeSpec::new("redis-replica-1", Role::Replica, local(6380))
                    .with_announce(named("redis-replica-1", 6379)),
                NodeSpec::new("redis-replica-2", Role::Replica, local(6381))
                    .with_announce(named("redis-replica-2", 6379)),
                NodeSpec::new("redis-sentinel-1", Role::Monitor, local(26379)),
                NodeSpec::new("redis-sentinel-2", Role::Monitor, local(26380)),
                NodeSpec::new("redis-sentinel-3", Role::Monitor, local(26381)),
            ],
        }
    }
}

impl ClusterConfig {
    /// Loads and validates a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let cfg: ClusterConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.master_name.is_empty() {
            return invalid("master_name must not be empty".into());
        }
        if self.quorum == 0 {
            return invalid("quorum must be at least 1".into());
        }

        let masters = self.nodes_with(Role::Master).count();
        if masters != 1 {
            return invalid(format!("expected exactly one master node, found {masters}"));
        }
        let monitors = self.nodes_with(Role::Monitor).count();
        if monitors == 0 {
            return invalid("at least one monitor node is required".into());
        }
        if self.quorum as usize > monitors {
            return invalid(format!(
                "quorum {} exceeds the {monitors} configured monitors",
                self.quorum
            ));
        }

        let mut ids = HashSet::new();
        let mut announced = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return invalid(format!("node at {} has an empty id", node.addr));
            }
            if !ids.insert(node.id.as_str()) {
                return invalid(format!("duplicate node id '{}'", node.id));
            }
            if !announced.insert(node.announced()) {
                return invalid(format!("duplicate node address {}", node.announced()));
            }
        }

        let t = &self.timing;
        if t.poll_interval_ms == 0 || t.command_timeout_ms == 0 || t.scenario_timeout_secs == 0 {
            return invalid("timing values must be greater than zero".into());
        }
        if t.max_polls_per_state == 0 {
            return invalid("max_polls_per_state must be at least 1".into());
        }
        Ok(())
    }

    pub fn nodes_with(&self, role: Role) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    /// The configured master. `validate` guarantees there is one.
    pub fn master(&self) -> Option<&NodeSpec> {
        self.nodes_with(Role::Master).next()
    }

    /// Finds the data node the monitor tier knows under `address`.
    pub fn data_node_announced_as(&self, address: &Address) -> Option<&NodeSpec> {
        self.nodes
            .iter()
            .filter(|n| n.role != Role::Monitor)
            .find(|n| n.announced() == address)
    }
}
