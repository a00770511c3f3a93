//! Quality gate: a configurable sequence of checks run against a branch.
//!
//! Every enabled check always runs - a failing check never short-circuits
//! later ones, so the verdict carries the full diagnostic picture for the
//! retry decision and the huddle log. Disabled checks are omitted entirely;
//! they are never counted as passing.

use crate::config::{CheckConfig, GateSection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// How much check output to keep in the detail string.
const DETAIL_TAIL_CHARS: usize = 400;

/// Broad classification of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckCategory {
    Tests,
    Lint,
    TypeCheck,
    Build,
    DiffSize,
    Other,
}

impl CheckCategory {
    /// Parse a config category string; unknown strings land in `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tests" | "test" => CheckCategory::Tests,
            "lint" => CheckCategory::Lint,
            "type-check" | "typecheck" | "types" => CheckCategory::TypeCheck,
            "build" => CheckCategory::Build,
            "diff-size" => CheckCategory::DiffSize,
            _ => CheckCategory::Other,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub category: CheckCategory,
}

/// Aggregate gate verdict. Produced fresh per run, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub passed: bool,
    pub checks: Vec<QualityCheck>,
}

impl QualityResult {
    fn from_checks(checks: Vec<QualityCheck>) -> Self {
        Self {
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    /// One-line summary naming the failing checks, for retry reasons and logs.
    pub fn summary(&self) -> String {
        if self.passed {
            return format!("all {} checks passed", self.checks.len());
        }
        let failed: Vec<&str> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        format!("{} of {} checks failed: {}", failed.len(), self.checks.len(), failed.join(", "))
    }
}

/// Runs the configured check sequence in a working directory.
pub struct QualityGate {
    config: GateSection,
}

impl QualityGate {
    pub fn new(config: GateSection) -> Self {
        Self { config }
    }

    /// Run every enabled check plus the built-in diff-size check.
    ///
    /// `diff_lines` is the changed-line count of the branch under review;
    /// a `max_diff_lines` of 0 disables the diff-size check.
    pub async fn run(&self, workdir: &Path, diff_lines: usize) -> QualityResult {
        let mut checks = Vec::new();

        for check in self.config.checks.iter().filter(|c| c.enabled) {
            checks.push(self.run_command_check(check, workdir).await);
        }

        if self.config.max_diff_lines > 0 {
            let passed = diff_lines <= self.config.max_diff_lines;
            checks.push(QualityCheck {
                name: "diff-size".to_string(),
                passed,
                detail: format!(
                    "{} changed lines (limit {})",
                    diff_lines, self.config.max_diff_lines
                ),
                category: CheckCategory::DiffSize,
            });
        }

        QualityResult::from_checks(checks)
    }

    async fn run_command_check(&self, check: &CheckConfig, workdir: &Path) -> QualityCheck {
        debug!(check = %check.name, command = %check.command, "running gate check");

        let category = CheckCategory::parse(&check.category);
        let result = timeout(
            Duration::from_secs(check.timeout_secs),
            Command::new("sh")
                .arg("-c")
                .arg(&check.command)
                .current_dir(workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let passed = output.status.success();
                let text = if passed {
                    String::from_utf8_lossy(&output.stdout).into_owned()
                } else {
                    // Failures usually explain themselves on stderr.
                    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                    combined
                };
                QualityCheck {
                    name: check.name.clone(),
                    passed,
                    detail: tail(&text),
                    category,
                }
            }
            Ok(Err(e)) => QualityCheck {
                name: check.name.clone(),
                passed: false,
                detail: format!("failed to spawn `{}`: {}", check.command, e),
                category,
            },
            Err(_) => QualityCheck {
                name: check.name.clone(),
                passed: false,
                detail: format!("timed out after {}s", check.timeout_secs),
                category,
            },
        }
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= DETAIL_TAIL_CHARS {
        return trimmed.to_string();
    }
    let start = trimmed.len() - DETAIL_TAIL_CHARS;
    // Avoid slicing mid-codepoint.
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(start);
    format!("…{}", &trimmed[start..])
}
