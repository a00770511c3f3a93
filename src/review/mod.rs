//! Adversarial challenger review.
//!
//! After an issue's branch passes the quality gate, a second agent session
//! - independent of the one that produced the change - is asked to attack
//! it. The challenger sees the issue's title, body, and diff statistics,
//! and answers with a leading verdict token: a response beginning with
//! `APPROVED` approves (the remainder is feedback); anything else,
//! including a response beginning with `REJECTED`, rejects with the full
//! text preserved verbatim as feedback. The session is torn down after one
//! exchange and never retries internally.

use crate::errors::IssueError;
use crate::session::{SessionOptions, SessionProvider};
use crate::sprint::PlannedIssue;
use crate::tracker::git::ChangeSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The challenger's structured verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengerVerdict {
    pub approved: bool,
    pub feedback: String,
}

/// Parse a challenger response by its leading token.
pub fn parse_verdict(response: &str) -> ChallengerVerdict {
    let trimmed = response.trim_start();
    if let Some(rest) = trimmed.strip_prefix("APPROVED") {
        ChallengerVerdict {
            approved: true,
            feedback: rest.trim_start_matches([':', ' ', '\n']).trim().to_string(),
        }
    } else {
        ChallengerVerdict {
            approved: false,
            feedback: response.to_string(),
        }
    }
}

/// Drives one challenger exchange per reviewed issue.
pub struct ChallengerReview {
    // Sessions are opened directly on the provider, not through the pool:
    // the primary session is still held while the challenger runs, and a
    // capacity-1 pool would deadlock against it.
    provider: Arc<dyn SessionProvider>,
}

impl ChallengerReview {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self { provider }
    }

    /// Run the single adversarial exchange for an issue's branch.
    pub async fn review(
        &self,
        issue: &PlannedIssue,
        changes: &ChangeSet,
    ) -> Result<ChallengerVerdict, IssueError> {
        let options = SessionOptions::for_issue("challenger", issue.number);
        let session = self.provider.open(&options).await?;

        let prompt = build_challenge_prompt(issue, changes);
        let result = self.provider.run(&session, &prompt).await;
        self.provider.close(&session).await;

        let response = result?;
        let verdict = parse_verdict(&response);
        debug!(
            issue = issue.number,
            approved = verdict.approved,
            "challenger verdict"
        );
        Ok(verdict)
    }
}

/// Build the challenger prompt from the issue and its diff statistics.
fn build_challenge_prompt(issue: &PlannedIssue, changes: &ChangeSet) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Adversarial Review: issue #{} - {}\n\n",
        issue.number, issue.title
    ));
    prompt.push_str(
        "You are an adversarial reviewer. Your job is to find reasons to REJECT \
         this change. Inspect the branch in the working directory.\n\n",
    );

    prompt.push_str("## Issue\n\n");
    prompt.push_str(&issue.body);
    prompt.push_str("\n\n## Diff statistics\n\n");
    prompt.push_str(&format!(
        "- {} files changed, {} lines touched\n",
        changes.files.len(),
        changes.lines_changed
    ));
    for file in &changes.files {
        prompt.push_str(&format!("- {}\n", file));
    }

    prompt.push_str(
        "\n## Verdict format\n\n\
         Reply with a single line starting with either `APPROVED` or `REJECTED`, \
         followed by your reasoning.\n",
    );

    prompt
}
