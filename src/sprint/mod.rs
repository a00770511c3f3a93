//! Sprint planning model and the orchestrating runner.

pub mod prompts;
pub mod runner;

pub use runner::{RunnerHandles, SprintRunner};

use serde::{Deserialize, Serialize};

/// One issue scheduled into the sprint, with its declared expected scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    /// Files the issue is expected to touch; everything else counts as drift.
    #[serde(default)]
    pub expected_files: Vec<String>,
    /// Working branch for the issue; derived from the number when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl PlannedIssue {
    pub fn new(number: u64, title: &str, body: &str) -> Self {
        Self {
            number,
            title: title.to_string(),
            body: body.to_string(),
            expected_files: Vec::new(),
            branch: None,
        }
    }

    /// The working branch name for this issue.
    pub fn branch_name(&self) -> String {
        self.branch
            .clone()
            .unwrap_or_else(|| format!("huddle/issue-{}", self.number))
    }
}

/// The sprint plan: issues plus the groups eligible for concurrent dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SprintPlan {
    pub issues: Vec<PlannedIssue>,
    /// Issue numbers grouped by dispatch eligibility, in execution order.
    /// An empty list means a single group containing every issue.
    #[serde(default)]
    pub execution_groups: Vec<Vec<u64>>,
}

impl SprintPlan {
    pub fn issue(&self, number: u64) -> Option<&PlannedIssue> {
        self.issues.iter().find(|i| i.number == number)
    }

    pub fn issue_mut(&mut self, number: u64) -> Option<&mut PlannedIssue> {
        self.issues.iter_mut().find(|i| i.number == number)
    }

    /// Execution groups with the single-group fallback applied. Numbers
    /// that match no planned issue are dropped.
    pub fn effective_groups(&self) -> Vec<Vec<u64>> {
        if self.execution_groups.is_empty() {
            return vec![self.issues.iter().map(|i| i.number).collect()];
        }
        self.execution_groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .copied()
                    .filter(|n| self.issue(*n).is_some())
                    .collect()
            })
            .filter(|group: &Vec<u64>| !group.is_empty())
            .collect()
    }
}
