//! Unified configuration for the Huddle engine.
//!
//! Reads `.huddle/huddle.toml` from the project directory and layers
//! environment and CLI overrides on top (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [sprint]
//! max_concurrent_sessions = 3
//! max_retries = 3
//! challenger_enabled = true
//!
//! [drift]
//! threshold = 0.4
//! max_incidents = 5
//! policy = "revert"
//!
//! [[gate.checks]]
//! name = "tests"
//! command = "cargo test"
//! category = "tests"
//!
//! [[gate.checks]]
//! name = "lint"
//! command = "cargo clippy -- -D warnings"
//! category = "lint"
//! enabled = false
//!
//! [agent]
//! cmd = "claude"
//! timeout_secs = 1800
//!
//! [tracker]
//! cmd = "gh"
//!
//! [notify]
//! webhook_url = "https://ntfy.example.com/sprints"
//! ```

use crate::errors::EngineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do when a single issue's drift exceeds the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Hard-reset the branch to the pre-attempt snapshot and retry.
    #[default]
    Revert,
    /// Stop and ask the operator whether to accept the drift.
    Halt,
}

impl std::fmt::Display for DriftPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftPolicy::Revert => write!(f, "revert"),
            DriftPolicy::Halt => write!(f, "halt"),
        }
    }
}

impl std::str::FromStr for DriftPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "revert" => Ok(DriftPolicy::Revert),
            "halt" => Ok(DriftPolicy::Halt),
            _ => anyhow::bail!("Invalid drift policy '{}'. Valid values: revert, halt", s),
        }
    }
}

/// Sprint-level execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintSection {
    /// Maximum agent sessions open at once.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Retry budget per issue, shared across gate, drift, and challenger failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether the adversarial challenger review runs on each issue.
    #[serde(default = "default_challenger_enabled")]
    pub challenger_enabled: bool,
}

fn default_max_concurrent_sessions() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_challenger_enabled() -> bool {
    true
}

impl Default for SprintSection {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_retries: default_max_retries(),
            challenger_enabled: default_challenger_enabled(),
        }
    }
}

/// Drift containment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSection {
    /// Per-issue drift fraction (0.0..=1.0) above which the policy fires.
    #[serde(default = "default_drift_threshold")]
    pub threshold: f64,
    /// Sprint-wide incident count above which the sprint aborts.
    #[serde(default = "default_max_incidents")]
    pub max_incidents: u32,
    /// Per-issue response to excess drift.
    #[serde(default)]
    pub policy: DriftPolicy,
}

fn default_drift_threshold() -> f64 {
    0.4
}

fn default_max_incidents() -> u32 {
    5
}

impl Default for DriftSection {
    fn default() -> Self {
        Self {
            threshold: default_drift_threshold(),
            max_incidents: default_max_incidents(),
            policy: DriftPolicy::default(),
        }
    }
}

/// One quality-gate check: a named shell command in a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    pub command: String,
    #[serde(default = "default_check_category")]
    pub category: String,
    #[serde(default = "default_check_enabled")]
    pub enabled: bool,
    /// Per-check timeout; checks that outrun it count as failed.
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_check_category() -> String {
    "build".to_string()
}

fn default_check_enabled() -> bool {
    true
}

fn default_check_timeout_secs() -> u64 {
    600
}

/// Quality-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckConfig>,
    /// Maximum changed-line count allowed by the diff-size check.
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: usize,
}

fn default_checks() -> Vec<CheckConfig> {
    vec![
        CheckConfig {
            name: "tests".to_string(),
            command: "cargo test".to_string(),
            category: "tests".to_string(),
            enabled: true,
            timeout_secs: default_check_timeout_secs(),
        },
        CheckConfig {
            name: "build".to_string(),
            command: "cargo build".to_string(),
            category: "build".to_string(),
            enabled: true,
            timeout_secs: default_check_timeout_secs(),
        },
    ]
}

fn default_max_diff_lines() -> usize {
    2000
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            checks: default_checks(),
            max_diff_lines: default_max_diff_lines(),
        }
    }
}

/// Coding-agent CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent CLI command (default: "claude").
    #[serde(default = "default_agent_cmd")]
    pub cmd: String,
    /// Arguments passed on every invocation.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Timeout for a single agent-session call.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Skip permission prompts in the agent CLI.
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
}

fn default_agent_cmd() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_agent_timeout_secs() -> u64 {
    1800
}

fn default_skip_permissions() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            cmd: default_agent_cmd(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout_secs(),
            skip_permissions: default_skip_permissions(),
        }
    }
}

/// Issue-tracker CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    /// Tracker CLI command (default: "gh").
    #[serde(default = "default_tracker_cmd")]
    pub cmd: String,
}

fn default_tracker_cmd() -> String {
    "gh".to_string()
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            cmd: default_tracker_cmd(),
        }
    }
}

/// Push-notification settings. Absent URL disables notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Filesystem layout settings, relative to the project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Where sprint state and logs live.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    /// Where engine log files go.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs/sprints")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".huddle/logs")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            log_dir: default_log_dir(),
        }
    }
}

/// The full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HuddleConfig {
    #[serde(default)]
    pub sprint: SprintSection,
    #[serde(default)]
    pub drift: DriftSection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub paths: PathsSection,
}

impl HuddleConfig {
    /// Parse a config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse huddle.toml")
    }

    /// Load from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load `.huddle/huddle.toml` under the project directory, or defaults
    /// if it does not exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(".huddle").join("huddle.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Environment overrides. Only the agent and tracker commands are
    /// settable from the environment; everything else belongs in the file.
    fn apply_env(&mut self) {
        if let Ok(cmd) = std::env::var("HUDDLE_AGENT_CMD") {
            self.agent.cmd = cmd;
        }
        if let Ok(cmd) = std::env::var("HUDDLE_TRACKER_CMD") {
            self.tracker.cmd = cmd;
        }
    }

    /// Reject configurations the engine cannot run with. Called once at
    /// startup; failures are fatal.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sprint.max_concurrent_sessions == 0 {
            return Err(EngineError::Configuration(
                "sprint.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.drift.threshold) {
            return Err(EngineError::Configuration(format!(
                "drift.threshold must be within 0.0..=1.0, got {}",
                self.drift.threshold
            )));
        }
        if self.agent.cmd.trim().is_empty() {
            return Err(EngineError::Configuration(
                "agent.cmd must not be empty".to_string(),
            ));
        }
        for check in &self.gate.checks {
            if check.command.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "gate check '{}' has an empty command",
                    check.name
                )));
            }
        }
        Ok(())
    }
}
