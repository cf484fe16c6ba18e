//! Error types for the verification engine.
//!
//! Each concern gets its own enum. Only [`ConfigError`] ends a run;
//! everything else is folded into a check or scenario result.

use thiserror::Error;

use crate::types::Address;

/// Errors from talking to a store or monitor node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The node could not be reached at all (connect refused, reset, DNS).
    #[error("{0} unreachable: {1}")]
    Unreachable(Address, String),

    /// The command did not complete within the client's timeout.
    #[error("{0} timed out after {1}ms")]
    Timeout(Address, u64),

    /// The node sent bytes that are not valid RESP.
    #[error("protocol error from {0}: {1}")]
    Protocol(Address, String),

    /// The node replied with an error frame.
    #[error("server error from {0}: {1}")]
    Server(Address, String),

    /// Authentication was rejected.
    #[error("authentication failed for {0}: {1}")]
    Auth(Address, String),
}

impl ClientError {
    /// Returns true for errors meaning the node is down rather than
    /// misbehaving.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable(..) | ClientError::Timeout(..))
    }
}

/// Errors from decoding monitor or status replies into records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A numeric field held something other than a number.
    #[error("field '{field}' is not numeric: '{value}'")]
    NotNumeric { field: String, value: String },

    /// A numeric field parsed but holds an impossible value.
    #[error("field '{field}' is out of range: '{value}'")]
    OutOfRange { field: String, value: String },

    /// A record was missing one of `name`, `ip` or `port`.
    #[error("record '{record}' is missing required field '{field}'")]
    MissingField { record: String, field: &'static str },

    /// Neither the flags nor `role-reported` named a role.
    #[error("record '{0}' has no derivable role")]
    NoRole(String),

    /// A single-record reply decoded to some other number of records.
    #[error("expected exactly one record, got {0}")]
    RecordCount(usize),
}

/// Errors from the container runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The control command could not be spawned.
    #[error("failed to run '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// The control command exited non-zero.
    #[error("'{command}' failed for {id}: {stderr}")]
    Failed {
        command: String,
        id: String,
        stderr: String,
    },
}

/// Invalid or unreadable configuration. Terminates the run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The phase of a scenario in which an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Baseline,
    Fault,
    Watch,
    Restore,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Baseline => write!(f, "baseline"),
            Phase::Fault => write!(f, "fault"),
            Phase::Watch => write!(f, "watch"),
            Phase::Restore => write!(f, "restore"),
        }
    }
}

/// Errors raised while running a scenario, tagged with the phase.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("{phase}: fault injection on {node} failed: {source}")]
    FaultInjection {
        phase: Phase,
        node: String,
        source: ControlError,
    },

    #[error("{phase}: {source}")]
    Client { phase: Phase, source: ClientError },

    #[error("{phase}: {source}")]
    Decode { phase: Phase, source: DecodeError },

    #[error("{phase}: {reason}")]
    Other { phase: Phase, reason: String },

    #[error("interrupted by operator")]
    Interrupted,
}

impl ScenarioError {
    pub fn control(phase: Phase, node: impl Into<String>, source: ControlError) -> Self {
        ScenarioError::FaultInjection {
            phase,
            node: node.into(),
            source,
        }
    }

    pub fn client(phase: Phase, source: ClientError) -> Self {
        ScenarioError::Client { phase, source }
    }

    pub fn decode(phase: Phase, source: DecodeError) -> Self {
        ScenarioError::Decode { phase, source }
    }

    pub fn other(phase: Phase, reason: impl Into<String>) -> Self {
        ScenarioError::Other {
            phase,
            reason: reason.into(),
        }
    }
}
