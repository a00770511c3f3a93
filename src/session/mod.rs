//! Agent sessions and the bounded pool that owns them.
//!
//! A `PooledSession` is owned by the `SessionPool` for its lifetime:
//! created on acquire, destroyed on release, never shared across two
//! concurrent units of work. The `SessionProvider` trait seams the pool
//! from the concrete agent CLI so the orchestrator is testable without
//! spawning real agent processes.

pub mod agent;
pub mod pool;

pub use agent::CliAgentProvider;
pub use pool::SessionPool;

use crate::errors::IssueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A live agent session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledSession {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl PooledSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

impl Default for PooledSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-supplied context for a session acquisition, used for log
/// correlation and provider-side labeling.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub purpose: String,
    pub issue_number: Option<u64>,
}

impl SessionOptions {
    pub fn for_phase(purpose: &str) -> Self {
        Self {
            purpose: purpose.to_string(),
            issue_number: None,
        }
    }

    pub fn for_issue(purpose: &str, issue_number: u64) -> Self {
        Self {
            purpose: purpose.to_string(),
            issue_number: Some(issue_number),
        }
    }
}

/// Advisory pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub available: usize,
    pub total: usize,
}

/// Opens, drives, and closes agent sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a new session. Failures are retryable session errors.
    async fn open(&self, options: &SessionOptions) -> Result<PooledSession, IssueError>;

    /// Run one prompt exchange, returning the agent's full output.
    async fn run(&self, session: &PooledSession, prompt: &str) -> Result<String, IssueError>;

    /// Tear the session down. Best-effort; never fails the caller.
    async fn close(&self, session: &PooledSession);
}
