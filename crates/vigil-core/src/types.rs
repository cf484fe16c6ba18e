//! Record types shared by the decoder, topology model and evaluator.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `host:port` pair as the monitor tier names a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Creates an address. Returns `None` if the host is empty.
    pub fn new(host: impl Into<String>, port: u16) -> Option<Self> {
        let host = host.into();
        if host.is_empty() {
            return None;
        }
        Some(Self { host, port })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = String;

    /// Parses `host:port`. The port is split at the last colon so that
    /// hostnames with dots are fine.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| "expected host:port format".to_string())?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| format!("invalid port '{port_str}'"))?;
        Address::new(host, port).ok_or_else(|| "host must not be empty".to_string())
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

/// The role of a monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts writes, source of replication.
    Master,
    /// Read-only copy of a master.
    Replica,
    /// Sentinel process watching the master.
    Monitor,
}

impl Role {
    /// Maps a role token as it appears in flags, `role-reported`, or a
    /// node's own `role:` status line.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "master" => Some(Role::Master),
            "slave" | "replica" => Some(Role::Replica),
            "sentinel" => Some(Role::Monitor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "replica"),
            Role::Monitor => write!(f, "monitor"),
        }
    }
}

/// Health of a replica's replication link to its master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Up,
    Down,
    Unknown,
}

impl LinkStatus {
    /// Monitor replies say `ok`/`err`, a node's own status says `up`/`down`.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "ok" | "up" => LinkStatus::Up,
            "err" | "down" => LinkStatus::Down,
            _ => LinkStatus::Unknown,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "Up"),
            LinkStatus::Down => write!(f, "Down"),
            LinkStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Flag tokens meaning the monitor tier considers a node down.
pub const DOWN_FLAGS: &[&str] = &["s_down", "o_down"];

/// One monitored entity, as reported by the monitor tier or by the node
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub address: Address,
    pub role: Role,
    pub flags: BTreeSet<String>,
    pub link_status: Option<LinkStatus>,
    pub last_io_age_secs: Option<u64>,
    /// Replica eligibility rank; lower is more eligible.
    pub priority: Option<u64>,
    /// The master this node replicates from, when it reports one.
    pub upstream: Option<Address>,
    /// `quorum` on a monitored master record.
    pub quorum: Option<u32>,
    /// `num-other-sentinels` on a monitored master record.
    pub other_monitors: Option<u32>,
    /// `num-slaves` on a monitored master record.
    pub replica_count: Option<u32>,
    /// Uninterpreted fields, in arrival order.
    pub extra: Vec<(String, String)>,
}

impl NodeRecord {
    /// Creates a record with only the identifying attributes set.
    pub fn new(name: impl Into<String>, address: Address, role: Role) -> Self {
        Self {
            name: name.into(),
            address,
            role,
            flags: BTreeSet::new(),
            link_status: None,
            last_io_age_secs: None,
            priority: None,
            upstream: None,
            quorum: None,
            other_monitors: None,
            replica_count: None,
            extra: Vec::new(),
        }
    }

    /// Returns true if the flags mark this node subjectively or
    /// objectively down.
    pub fn is_down(&self) -> bool {
        DOWN_FLAGS.iter().any(|f| self.flags.contains(*f))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Looks up an uninterpreted field by name.
    pub fn extra_field(&self, key: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Comma-joined flags, `-` when empty.
    pub fn flags_display(&self) -> String {
        if self.flags.is_empty() {
            "-".into()
        } else {
            self.flags.iter().cloned().collect::<Vec<_>>().join(",")
        }
    }
}
