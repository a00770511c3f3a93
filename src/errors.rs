//! Typed error hierarchy for the Huddle engine.
//!
//! Two top-level enums split the taxonomy along the retry boundary:
//! - `EngineError` - fatal engine-level conditions that abort the sprint
//! - `IssueError` - per-issue failures consumed by the retry policy
//!
//! Per-issue failures are retried up to the configured bound and never
//! abort the sprint on their own; engine errors always do.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions at the engine level. Each variant carries enough
/// context to print one explicit message naming cause and remediation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(
        "Sprint {sprint} is already being run by process {holder_pid} (lock: {lock_path}). \
         Stop that process or wait for it to finish before starting another engine."
    )]
    LockContention {
        sprint: String,
        holder_pid: u32,
        lock_path: PathBuf,
    },

    #[error(
        "Sprint state file {path} has schema version {found}, expected {expected}. \
         Delete the file and restart the sprint; state is never migrated in place."
    )]
    StateVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("External tool `{command}` failed: {message}")]
    ExternalTool { command: String, message: String },

    #[error("Sprint aborted: {incidents} drift incidents exceeded the configured maximum of {max}")]
    DriftBudgetExhausted { incidents: u32, max: u32 },

    #[error("Failed to persist sprint state at {path}: {source}")]
    StatePersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures scoped to a single issue's attempt sequence. All variants are
/// retryable within the issue's budget; on exhaustion the issue is marked
/// failed with the final variant's message as the reason.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Agent session failed: {0}")]
    Session(String),

    #[error("Agent session timed out after {secs}s")]
    SessionTimeout { secs: u64 },

    #[error("Quality gate failed: {summary}")]
    QualityGate { summary: String },

    #[error("Drift {percentage:.0}% exceeded threshold {threshold:.0}% ({unplanned} unplanned files)")]
    DriftExceeded {
        percentage: f64,
        threshold: f64,
        unplanned: usize,
    },

    #[error("Challenger rejected the change: {feedback}")]
    ChallengerRejected { feedback: String },

    #[error("External tool failed: {0}")]
    Tool(String),
}

impl IssueError {
    /// Short reason string recorded in the huddle entry when retries run out.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
