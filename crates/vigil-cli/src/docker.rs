//! Container control through the docker CLI.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use vigil_core::{ControlError, ProcessControl, RestartPolicy};

/// Runs `docker` subcommands against containers named by node id.
pub struct DockerControl {
    program: String,
}

impl DockerControl {
    /// `program` is the docker binary, usually just `docker`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs one command and returns its stdout.
    async fn run(&self, id: &str, args: &[&str]) -> Result<String, ControlError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "running");
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ControlError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ControlError::Failed {
                command,
                id: id.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait(?Send)]
impl ProcessControl for DockerControl {
    async fn stop(&self, id: &str) -> Result<(), ControlError> {
        self.run(id, &["stop", id]).await.map(drop)
    }

    async fn start(&self, id: &str) -> Result<(), ControlError> {
        self.run(id, &["start", id]).await.map(drop)
    }

    async fn is_running(&self, id: &str) -> Result<bool, ControlError> {
        let filter = format!("name=^{id}$");
        let out = self.run(id, &["ps", "-q", "-f", &filter]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn set_restart_policy(&self, id: &str, policy: RestartPolicy) -> Result<(), ControlError> {
        let flag = format!("--restart={}", policy.as_str());
        self.run(id, &["update", &flag, id]).await.map(drop)
    }
}
