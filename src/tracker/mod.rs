//! Issue-tracker collaborator.
//!
//! Every operation is a synchronous request/response backed by a single
//! external command invocation (a `gh`-style CLI) whose structured output
//! is parsed. Invocation failure surfaces as an `ExternalTool` error naming
//! the failed command and its message; the orchestrator decides whether
//! that aborts the affected issue.

pub mod git;

pub use git::GitWorkspace;

use crate::errors::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A tracker label (subset of fields we care about).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// A tracker issue (subset of fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// A milestone as returned by the tracker API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub number: u64,
    pub title: String,
    pub state: String,
}

/// A pull request (subset of fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub head_ref_name: String,
    pub base_ref_name: String,
}

/// Partial update for an issue; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    /// "open" or "closed".
    pub state: Option<String>,
}

/// The tracker operations the engine consumes.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<Issue, EngineError>;
    async fn list_issues(
        &self,
        labels: &[String],
        state: Option<&str>,
        milestone: Option<&str>,
    ) -> Result<Vec<Issue>, EngineError>;
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64, EngineError>;
    async fn update_issue(&self, number: u64, update: IssueUpdate) -> Result<(), EngineError>;
    async fn add_comment(&self, number: u64, body: &str) -> Result<(), EngineError>;
    async fn set_label(&self, number: u64, label: &str) -> Result<(), EngineError>;
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), EngineError>;
    async fn get_labels(&self, number: u64) -> Result<Vec<Label>, EngineError>;
    async fn create_milestone(&self, title: &str) -> Result<Milestone, EngineError>;
    async fn get_milestone(&self, number: u64) -> Result<Milestone, EngineError>;
    async fn set_milestone(&self, issue: u64, title: &str) -> Result<(), EngineError>;
    async fn close_milestone(&self, number: u64) -> Result<(), EngineError>;
    async fn list_pull_requests(
        &self,
        state: Option<&str>,
        base: Option<&str>,
        head: Option<&str>,
    ) -> Result<Vec<PullRequest>, EngineError>;
}

const ISSUE_JSON_FIELDS: &str = "number,title,body,state,labels";
const PR_JSON_FIELDS: &str = "number,title,state,headRefName,baseRefName";

/// `gh`-backed tracker client.
pub struct GhClient {
    cmd: String,
    working_dir: PathBuf,
}

impl GhClient {
    pub fn new(cmd: &str, working_dir: PathBuf) -> Self {
        Self {
            cmd: cmd.to_string(),
            working_dir,
        }
    }

    /// Run one tracker command and return its stdout.
    async fn invoke(&self, args: &[&str]) -> Result<String, EngineError> {
        let cmdline = format!("{} {}", self.cmd, args.join(" "));
        debug!(command = %cmdline, "invoking tracker");

        let output = Command::new(&self.cmd)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::ExternalTool {
                command: cmdline.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(EngineError::ExternalTool {
                command: cmdline,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        stdout: &str,
    ) -> Result<T, EngineError> {
        serde_json::from_str(stdout).map_err(|e| EngineError::ExternalTool {
            command: command.to_string(),
            message: format!("unparseable output: {}", e),
        })
    }
}

#[async_trait]
impl IssueTracker for GhClient {
    async fn get_issue(&self, number: u64) -> Result<Issue, EngineError> {
        let n = number.to_string();
        let args = ["issue", "view", n.as_str(), "--json", ISSUE_JSON_FIELDS];
        let out = self.invoke(&args).await?;
        self.parse("issue view", &out)
    }

    async fn list_issues(
        &self,
        labels: &[String],
        state: Option<&str>,
        milestone: Option<&str>,
    ) -> Result<Vec<Issue>, EngineError> {
        let mut args: Vec<&str> = vec!["issue", "list", "--json", ISSUE_JSON_FIELDS];
        if let Some(state) = state {
            args.extend(["--state", state]);
        }
        for label in labels {
            args.extend(["--label", label.as_str()]);
        }
        if let Some(milestone) = milestone {
            args.extend(["--milestone", milestone]);
        }
        let out = self.invoke(&args).await?;
        self.parse("issue list", &out)
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<u64, EngineError> {
        let mut args: Vec<&str> = vec!["issue", "create", "--title", title, "--body", body];
        for label in labels {
            args.extend(["--label", label.as_str()]);
        }
        // gh prints the new issue URL; the number is its last segment.
        let out = self.invoke(&args).await?;
        out.trim()
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EngineError::ExternalTool {
                command: "issue create".to_string(),
                message: format!("could not parse issue number from: {}", out.trim()),
            })
    }

    async fn update_issue(&self, number: u64, update: IssueUpdate) -> Result<(), EngineError> {
        let n = number.to_string();

        if update.title.is_some() || update.body.is_some() {
            let mut args: Vec<&str> = vec!["issue", "edit", n.as_str()];
            if let Some(ref title) = update.title {
                args.extend(["--title", title]);
            }
            if let Some(ref body) = update.body {
                args.extend(["--body", body]);
            }
            self.invoke(&args).await?;
        }

        match update.state.as_deref() {
            Some("closed") => {
                self.invoke(&["issue", "close", n.as_str()]).await?;
            }
            Some("open") => {
                self.invoke(&["issue", "reopen", n.as_str()]).await?;
            }
            Some(other) => {
                return Err(EngineError::ExternalTool {
                    command: "issue edit".to_string(),
                    message: format!("unknown issue state '{}'", other),
                });
            }
            None => {}
        }
        Ok(())
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<(), EngineError> {
        let n = number.to_string();
        self.invoke(&["issue", "comment", n.as_str(), "--body", body]).await?;
        Ok(())
    }

    async fn set_label(&self, number: u64, label: &str) -> Result<(), EngineError> {
        let n = number.to_string();
        self.invoke(&["issue", "edit", n.as_str(), "--add-label", label]).await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), EngineError> {
        let n = number.to_string();
        self.invoke(&["issue", "edit", n.as_str(), "--remove-label", label])
            .await?;
        Ok(())
    }

    async fn get_labels(&self, number: u64) -> Result<Vec<Label>, EngineError> {
        Ok(self.get_issue(number).await?.labels)
    }

    async fn create_milestone(&self, title: &str) -> Result<Milestone, EngineError> {
        let title_field = format!("title={}", title);
        let out = self
            .invoke(&[
                "api",
                "repos/{owner}/{repo}/milestones",
                "-f",
                title_field.as_str(),
            ])
            .await?;
        self.parse("api milestones", &out)
    }

    async fn get_milestone(&self, number: u64) -> Result<Milestone, EngineError> {
        let path = format!("repos/{{owner}}/{{repo}}/milestones/{}", number);
        let out = self.invoke(&["api", path.as_str()]).await?;
        self.parse("api milestones", &out)
    }

    async fn set_milestone(&self, issue: u64, title: &str) -> Result<(), EngineError> {
        let n = issue.to_string();
        self.invoke(&["issue", "edit", n.as_str(), "--milestone", title])
            .await?;
        Ok(())
    }

    async fn close_milestone(&self, number: u64) -> Result<(), EngineError> {
        let path = format!("repos/{{owner}}/{{repo}}/milestones/{}", number);
        self.invoke(&["api", "-X", "PATCH", path.as_str(), "-f", "state=closed"])
            .await?;
        Ok(())
    }

    async fn list_pull_requests(
        &self,
        state: Option<&str>,
        base: Option<&str>,
        head: Option<&str>,
    ) -> Result<Vec<PullRequest>, EngineError> {
        let mut args: Vec<&str> = vec!["pr", "list", "--json", PR_JSON_FIELDS];
        if let Some(state) = state {
            args.extend(["--state", state]);
        }
        if let Some(base) = base {
            args.extend(["--base", base]);
        }
        if let Some(head) = head {
            args.extend(["--head", head]);
        }
        let out = self.invoke(&args).await?;
        self.parse("pr list", &out)
    }
}
