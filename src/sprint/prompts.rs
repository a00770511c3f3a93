//! Prompt templates for the phase agent tasks.
//!
//! Each phase sends one kind of prompt to a coding-agent session:
//! refine rewrites issue bodies, plan produces the expected-file map and
//! execution groups as JSON, execute implements a single issue, review
//! summarizes the sprint, and retro reflects on it.

use crate::sprint::PlannedIssue;
use crate::state::SprintState;
use crate::util::extract_json_object;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Build the refine prompt for one issue.
pub fn build_refine_prompt(issue: &PlannedIssue) -> String {
    format!(
        "# Refine issue #{} - {}\n\n\
         Rewrite the issue body below into a precise, implementable task \
         description: concrete acceptance criteria, affected areas, and \
         edge cases. Reply with the refined body only, no preamble.\n\n\
         ## Current body\n\n{}\n",
        issue.number, issue.title, issue.body
    )
}

/// Build the planning prompt over the whole backlog.
pub fn build_plan_prompt(issues: &[PlannedIssue]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "# Sprint planning\n\n\
         For each issue below, list the files you expect the implementation \
         to touch, and group the issues into execution groups that can run \
         concurrently (independent issues share a group; dependent issues go \
         in later groups).\n\n## Issues\n\n",
    );
    for issue in issues {
        prompt.push_str(&format!("### #{} {}\n\n{}\n\n", issue.number, issue.title, issue.body));
    }
    prompt.push_str(
        "## Reply format\n\n\
         Reply with a single JSON object:\n\
         {\"issues\": [{\"number\": 1, \"expected_files\": [\"src/a.rs\"], \
         \"branch\": \"huddle/issue-1\"}], \"execution_groups\": [[1, 2], [3]]}\n",
    );
    prompt
}

/// Build the implementation prompt for one issue.
pub fn build_implement_prompt(issue: &PlannedIssue) -> String {
    let mut prompt = format!(
        "# Implement issue #{} - {}\n\n\
         Work on branch `{}`. Implement the issue below, including tests.\n\n\
         ## Issue\n\n{}\n",
        issue.number,
        issue.title,
        issue.branch_name(),
        issue.body
    );
    if !issue.expected_files.is_empty() {
        prompt.push_str("\n## Expected scope\n\nStay within these files:\n\n");
        for file in &issue.expected_files {
            prompt.push_str(&format!("- {}\n", file));
        }
    }
    prompt
}

/// Build the sprint-summary prompt from terminal results.
pub fn build_review_prompt(state: &SprintState) -> String {
    let mut prompt = format!(
        "# Sprint {} review\n\n\
         Summarize the sprint results below for the engineering log: what \
         shipped, what failed and why, and anything reviewers should watch.\n\n\
         ## Results\n\n",
        state.sprint_number
    );
    for entry in &state.results {
        prompt.push_str(&format!(
            "- #{} {} - {} (retries: {})\n",
            entry.issue_number, entry.title, entry.status, entry.retry_count
        ));
    }
    prompt
}

/// Build the retrospective prompt.
pub fn build_retro_prompt(state: &SprintState) -> String {
    let completed = state
        .results
        .iter()
        .filter(|r| r.status == crate::state::IssueStatus::Completed)
        .count();
    format!(
        "# Sprint {} retrospective\n\n\
         {} of {} issues completed; {} drift incidents recorded.\n\
         Write a short retrospective: what went well, what dragged, and one \
         process change to try next sprint.\n",
        state.sprint_number,
        completed,
        state.results.len(),
        state.drift_incidents
    )
}

/// Per-issue scope as returned by the planning session.
#[derive(Debug, Deserialize)]
pub struct PlannedScope {
    pub number: u64,
    #[serde(default)]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// The planning session's structured reply.
#[derive(Debug, Deserialize)]
pub struct PlanUpdate {
    #[serde(default)]
    pub issues: Vec<PlannedScope>,
    #[serde(default)]
    pub execution_groups: Vec<Vec<u64>>,
}

/// Extract and parse the planning JSON from raw agent output.
pub fn parse_plan_response(output: &str) -> Result<PlanUpdate> {
    let json = extract_json_object(output)
        .context("Planning response contained no JSON object")?;
    serde_json::from_str(&json).context("Planning response JSON did not match expected shape")
}
