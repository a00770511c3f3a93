//! Sprint state data model and persistence.
//!
//! This module provides:
//! - `SprintPhase` - the phase state machine vocabulary and legality rules
//! - `SprintState` - the full persisted sprint record
//! - `HuddleEntry` - the immutable per-issue post-execution record
//! - `StateStore` - atomic, versioned persistence (see `store`)
//! - `SprintLock` - the cross-process singleton guard (see `lock`)

pub mod lock;
pub mod store;

pub use lock::SprintLock;
pub use store::{STATE_SCHEMA_VERSION, StateStore};

use crate::gate::QualityResult;
use crate::review::ChallengerVerdict;
use crate::sprint::SprintPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of the delivery pipeline. Progression is one-directional along
/// init → refine → plan → execute → review → retro → complete; any
/// non-terminal phase may detour to `Paused` (and back) or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintPhase {
    Init,
    Refine,
    Plan,
    Execute,
    Review,
    Retro,
    Paused,
    Failed,
    Complete,
}

impl SprintPhase {
    /// Terminal phases accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SprintPhase::Failed | SprintPhase::Complete)
    }

    /// The next phase along the forward pipeline, if any.
    pub fn next_in_pipeline(&self) -> Option<SprintPhase> {
        match self {
            SprintPhase::Init => Some(SprintPhase::Refine),
            SprintPhase::Refine => Some(SprintPhase::Plan),
            SprintPhase::Plan => Some(SprintPhase::Execute),
            SprintPhase::Execute => Some(SprintPhase::Review),
            SprintPhase::Review => Some(SprintPhase::Retro),
            SprintPhase::Retro => Some(SprintPhase::Complete),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Legal moves: the forward pipeline step, any non-terminal phase to
    /// `Paused` or `Failed`, and `Paused` back to the phase held at
    /// suspension (validated by the runner, which knows that phase).
    pub fn can_transition_to(&self, next: SprintPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == SprintPhase::Paused {
            // Resume restores any non-terminal pipeline phase.
            return next != SprintPhase::Paused && !next.is_terminal()
                || next == SprintPhase::Failed;
        }
        if next == SprintPhase::Paused || next == SprintPhase::Failed {
            return true;
        }
        self.next_in_pipeline() == Some(next)
    }
}

impl std::fmt::Display for SprintPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SprintPhase::Init => "init",
            SprintPhase::Refine => "refine",
            SprintPhase::Plan => "plan",
            SprintPhase::Execute => "execute",
            SprintPhase::Review => "review",
            SprintPhase::Retro => "retro",
            SprintPhase::Paused => "paused",
            SprintPhase::Failed => "failed",
            SprintPhase::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

/// Terminal status of an issue's attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueStatus::Completed => write!(f, "completed"),
            IssueStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The per-issue post-execution record. Created once per issue's attempt
/// sequence and appended to `SprintState.results` in completion order;
/// immutable once the issue reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuddleEntry {
    pub issue_number: u64,
    pub title: String,
    pub status: IssueStatus,
    pub quality_result: Option<QualityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_review: Option<ChallengerVerdict>,
    /// Wall-clock seconds spent across all attempts.
    pub duration_secs: u64,
    pub files_changed: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Retries consumed before the terminal status (0 = first attempt).
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The full persisted sprint record. Owned exclusively by the runner and
/// mutated only through phase transitions; persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintState {
    pub sprint_number: u32,
    pub slug: String,
    pub phase: SprintPhase,
    /// The phase held when the sprint was paused; restored by resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<SprintPhase>,
    pub started_at: DateTime<Utc>,
    pub plan: SprintPlan,
    pub results: Vec<HuddleEntry>,
    pub drift_incidents: u32,
    /// On-disk schema version; load fails fatally on mismatch.
    pub version: u32,
}

impl SprintState {
    /// Fresh state for a sprint that is about to start.
    pub fn new(sprint_number: u32, slug: &str, plan: SprintPlan) -> Self {
        Self {
            sprint_number,
            slug: slug.to_string(),
            phase: SprintPhase::Init,
            paused_from: None,
            started_at: Utc::now(),
            plan,
            results: Vec::new(),
            drift_incidents: 0,
            version: STATE_SCHEMA_VERSION,
        }
    }

    /// Whether every planned issue has a terminal result recorded.
    pub fn all_issues_terminal(&self) -> bool {
        self.plan
            .issues
            .iter()
            .all(|issue| self.results.iter().any(|r| r.issue_number == issue.number))
    }
}
