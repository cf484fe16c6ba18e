//! Collaborator seams.
//!
//! The engine never opens sockets or spawns processes itself. It talks
//! to store and monitor nodes through [`StoreClient`], to the container
//! runtime through [`ProcessControl`], and reads time through [`Clock`].
//! The binary supplies the real implementations; tests supply fakes.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::decode::InfoMap;
use crate::error::{ClientError, ControlError};
use crate::types::Address;

/// Result of a test write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The node is a read-only replica and refused the write.
    ReadOnlyRejected,
}

/// Connection to one store or monitor node.
///
/// Implementations connect lazily and reconnect on the next call after a
/// failure, so a handle stays usable across a node restart.
#[async_trait(?Send)]
pub trait StoreClient {
    /// The address this client dials.
    fn address(&self) -> &Address;

    /// Liveness probe. A node that cannot be reached returns
    /// [`ClientError::Unreachable`] or [`ClientError::Timeout`].
    async fn ping(&mut self) -> Result<(), ClientError>;

    /// `INFO <section>`, parsed into fields.
    async fn info(&mut self, section: &str) -> Result<InfoMap, ClientError>;

    /// Sends an arbitrary command. Nested replies are flattened into one
    /// token sequence in order.
    async fn execute_raw(&mut self, args: &[&str]) -> Result<Vec<String>, ClientError>;

    async fn set(&mut self, key: &str, value: &str) -> Result<WriteOutcome, ClientError>;

    async fn get(&mut self, key: &str) -> Result<Option<String>, ClientError>;

    /// `DEL key [key ...]`. Returns how many keys existed.
    async fn del(&mut self, keys: &[&str]) -> Result<u64, ClientError>;
}

/// What the container runtime should do when a container exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Container lifecycle control. All operations are idempotent: stopping
/// a stopped container or starting a running one is not an error.
#[async_trait(?Send)]
pub trait ProcessControl {
    async fn stop(&self, id: &str) -> Result<(), ControlError>;

    async fn start(&self, id: &str) -> Result<(), ControlError>;

    async fn is_running(&self, id: &str) -> Result<bool, ControlError>;

    async fn set_restart_policy(&self, id: &str, policy: RestartPolicy)
        -> Result<(), ControlError>;
}

/// Time source for polling loops.
#[async_trait(?Send)]
pub trait Clock {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by tokio.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
