//! Concrete session provider backed by the coding-agent CLI.
//!
//! Each prompt exchange spawns the configured agent command, writes the
//! prompt to stdin, and captures stdout. The configured timeout bounds
//! every exchange; a timed-out process is killed and the call surfaces as
//! a retryable session timeout.

use super::{PooledSession, SessionOptions, SessionProvider};
use crate::config::AgentSection;
use crate::errors::IssueError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

pub struct CliAgentProvider {
    config: AgentSection,
    working_dir: PathBuf,
}

impl CliAgentProvider {
    pub fn new(config: AgentSection, working_dir: PathBuf) -> Self {
        Self {
            config,
            working_dir,
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.cmd);
        for arg in &self.config.args {
            cmd.arg(arg);
        }
        if self.config.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SessionProvider for CliAgentProvider {
    async fn open(&self, options: &SessionOptions) -> Result<PooledSession, IssueError> {
        // The agent CLI is stateless between exchanges; a session is a
        // correlation handle for logs and pool accounting.
        let session = PooledSession::new();
        debug!(
            session_id = %session.session_id,
            purpose = %options.purpose,
            issue = ?options.issue_number,
            "agent session opened"
        );
        Ok(session)
    }

    async fn run(&self, session: &PooledSession, prompt: &str) -> Result<String, IssueError> {
        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| IssueError::Session(format!("failed to spawn {}: {}", self.config.cmd, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| IssueError::Session(format!("failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| IssueError::Session(format!("failed to close stdin: {}", e)))?;
        }

        let secs = self.config.timeout_secs;
        let output = match timeout(Duration::from_secs(secs), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(IssueError::Session(format!(
                    "agent process failed: {}",
                    e
                )));
            }
            // kill_on_drop reaps the abandoned child.
            Err(_) => return Err(IssueError::SessionTimeout { secs }),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IssueError::Session(format!(
                "agent exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(
            session_id = %session.session_id,
            output_chars = output.stdout.len(),
            "agent exchange complete"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn close(&self, session: &PooledSession) {
        debug!(session_id = %session.session_id, "agent session closed");
    }
}
