//! Huddle formatting and the per-sprint log.
//!
//! Given a `HuddleEntry`, this collaborator renders the tracker comment
//! and the sprint-log entry, and appends entries to the per-sprint log
//! file. Formatting lives here so the runner never concerns itself with
//! human-readable output.

use crate::state::{HuddleEntry, IssueStatus};
use crate::util::format_duration;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Render the tracker comment posted on the issue when it reaches a
/// terminal status.
pub fn format_comment(entry: &HuddleEntry) -> String {
    let mut out = String::new();

    let headline = match entry.status {
        IssueStatus::Completed => "✅ Huddle: completed",
        IssueStatus::Failed => "❌ Huddle: failed",
    };
    out.push_str(headline);
    out.push_str(&format!(
        "\n\n- Duration: {}\n- Retries: {}\n- Files changed: {}\n",
        format_duration(Duration::from_secs(entry.duration_secs)),
        entry.retry_count,
        entry.files_changed.len()
    ));

    if let Some(ref quality) = entry.quality_result {
        out.push_str("\n### Quality gate\n\n");
        for check in &quality.checks {
            let mark = if check.passed { "✓" } else { "✗" };
            out.push_str(&format!("- {} {} - {}\n", mark, check.name, check.detail));
        }
    }

    if let Some(ref review) = entry.code_review {
        out.push_str("\n### Challenger review\n\n");
        let verdict = if review.approved { "approved" } else { "rejected" };
        out.push_str(&format!("{}: {}\n", verdict, review.feedback));
    }

    if let Some(ref error) = entry.error_message {
        out.push_str(&format!("\n### Failure reason\n\n{}\n", error));
    }

    out
}

/// Render the one-block sprint-log entry.
pub fn format_log_entry(entry: &HuddleEntry) -> String {
    let gate = entry
        .quality_result
        .as_ref()
        .map(|q| q.summary())
        .unwrap_or_else(|| "not run".to_string());
    format!(
        "## [{}] #{} {} - {}\n\nretries: {} | duration: {} | gate: {}\n",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.issue_number,
        entry.title,
        entry.status,
        entry.retry_count,
        format_duration(Duration::from_secs(entry.duration_secs)),
        gate
    )
}

/// Append-only per-sprint log file.
pub struct SprintLog {
    path: PathBuf,
}

impl SprintLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append a huddle entry to the log.
    pub fn append_entry(&self, entry: &HuddleEntry) -> Result<()> {
        self.append_text(&format_log_entry(entry))
    }

    /// Append free-form text (sprint summary, retrospective).
    pub fn append_text(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create sprint log directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open sprint log")?;
        file.write_all(text.as_bytes())
            .context("Failed to write sprint log entry")?;
        file.write_all(b"\n")
            .context("Failed to write sprint log entry")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{CheckCategory, QualityCheck, QualityResult};
    use crate::review::ChallengerVerdict;
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(status: IssueStatus) -> HuddleEntry {
        HuddleEntry {
            issue_number: 12,
            title: "Fix login".to_string(),
            status,
            quality_result: Some(QualityResult {
                passed: status == IssueStatus::Completed,
                checks: vec![QualityCheck {
                    name: "tests".to_string(),
                    passed: status == IssueStatus::Completed,
                    detail: "3 passed".to_string(),
                    category: CheckCategory::Tests,
                }],
            }),
            code_review: Some(ChallengerVerdict {
                approved: true,
                feedback: "tight diff".to_string(),
            }),
            duration_secs: 192,
            files_changed: vec!["src/auth.rs".to_string()],
            timestamp: Utc::now(),
            retry_count: 1,
            error_message: match status {
                IssueStatus::Completed => None,
                IssueStatus::Failed => Some("quality gate failed".to_string()),
            },
        }
    }

    #[test]
    fn test_comment_for_completed_issue() {
        let comment = format_comment(&entry(IssueStatus::Completed));
        assert!(comment.contains("completed"));
        assert!(comment.contains("3m12s"));
        assert!(comment.contains("✓ tests"));
        assert!(comment.contains("approved: tight diff"));
        assert!(!comment.contains("Failure reason"));
    }

    #[test]
    fn test_comment_for_failed_issue_names_reason() {
        let comment = format_comment(&entry(IssueStatus::Failed));
        assert!(comment.contains("failed"));
        assert!(comment.contains("Failure reason"));
        assert!(comment.contains("quality gate failed"));
    }

    #[test]
    fn test_log_entry_format() {
        let line = format_log_entry(&entry(IssueStatus::Completed));
        assert!(line.contains("#12 Fix login - completed"));
        assert!(line.contains("retries: 1"));
    }

    #[test]
    fn test_sprint_log_appends() {
        let dir = tempdir().unwrap();
        let log = SprintLog::new(dir.path().join("sprints/sprint-auth-3.log.md"));

        log.append_entry(&entry(IssueStatus::Completed)).unwrap();
        log.append_text("## Retrospective\n\nshipping cadence was good").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("#12 Fix login"));
        assert!(content.contains("Retrospective"));
        let first = content.find("#12").unwrap();
        let second = content.find("Retrospective").unwrap();
        assert!(first < second);
    }
}
