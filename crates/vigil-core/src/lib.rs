//! vigil-core: topology parsing and failover verification.
//!
//! Decodes monitor-tier replies into typed node records, assembles them
//! with direct node probes into cluster snapshots, evaluates consistency
//! predicates, and drives fault scenarios through a failover state
//! machine. All I/O goes through the traits in [`client`].

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod evaluate;
pub mod failover;
pub mod health;
pub mod observer;
pub mod report;
pub mod scenario;
pub mod scenarios;
pub mod topology;
pub mod types;

pub use client::{Clock, ProcessControl, RestartPolicy, StoreClient, SystemClock, WriteOutcome};
pub use config::{ClusterConfig, Credentials, NodeSpec, Timing};
pub use decode::{decode, decode_one, parse_info, probe_record, InfoMap};
pub use error::{ClientError, ConfigError, ControlError, DecodeError, Phase, ScenarioError};
pub use evaluate::{
    monitoring_healthy, overall_health, quorum_satisfied, replication_healthy, roles_consistent,
    Check,
};
pub use failover::{FailoverState, FailoverStateMachine, Observation, Transition};
pub use observer::Observer;
pub use report::{CheckResult, Report, ReportItem, ScenarioResult, Verdict};
pub use scenario::{Context, Orchestrator, Scenario, WatchOutcome};
pub use topology::{build, ClusterSnapshot, Finding, MonitorStatus, QuorumConfig, TopologyInputs};
pub use types::{Address, LinkStatus, NodeRecord, Role};
