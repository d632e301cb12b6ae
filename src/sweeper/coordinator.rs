//! Stop Coordinator
//!
//! Boundary to whatever actually terminates a workspace runtime.
//!
//! The sweeper may ask to stop a workspace that received activity after
//! it was selected. Implementations must treat stopping a live workspace
//! as a no-op or re-check liveness first, and must tolerate duplicate
//! requests for the same id.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use crate::error::StopError;

/// Receives "stop this workspace" requests
#[async_trait]
pub trait StopCoordinator: Send + Sync + std::fmt::Debug {
    async fn request_stop(&self, workspace_id: &str) -> Result<(), StopError>;
}

/// Runs an external program with the workspace id appended as the last
/// argument. Exit status zero confirms the stop.
#[derive(Debug, Clone)]
pub struct CommandStopCoordinator {
    program: String,
    args: Vec<String>,
}

impl CommandStopCoordinator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line; `None` when blank
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl StopCoordinator for CommandStopCoordinator {
    async fn request_stop(&self, workspace_id: &str) -> Result<(), StopError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(workspace_id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StopError::Unavailable(format!("{}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(StopError::Rejected(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Dry-run coordinator: logs and confirms every request
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyStopCoordinator;

#[async_trait]
impl StopCoordinator for LogOnlyStopCoordinator {
    async fn request_stop(&self, workspace_id: &str) -> Result<(), StopError> {
        info!(workspace_id = %workspace_id, "Stop requested (dry run)");
        Ok(())
    }
}
