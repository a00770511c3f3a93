use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use huddle::config::HuddleConfig;
use huddle::events::{EventBus, EventKind, SprintEvent};
use huddle::notify::Notifier;
use huddle::session::{CliAgentProvider, SessionProvider};
use huddle::sprint::{PlannedIssue, RunnerHandles, SprintPlan, SprintRunner};
use huddle::state::StateStore;
use huddle::tracker::git::{GitWorkspace, Workspace};
use huddle::tracker::{GhClient, IssueTracker};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "huddle")]
#[command(version, about = "Autonomous sprint orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to huddle.toml. Defaults to .huddle/huddle.toml in the project.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sprint over a set of tracker issues
    Run {
        /// Sprint number
        number: u32,
        /// Sprint slug (names the state and log files)
        slug: String,
        /// Select issues carrying this label (repeatable)
        #[arg(long)]
        label: Vec<String>,
        /// Select issues in this milestone
        #[arg(long)]
        milestone: Option<String>,
        /// Select explicit issue numbers (repeatable; overrides label/milestone)
        #[arg(long)]
        issue: Vec<u64>,
    },
    /// Show the persisted state of a sprint
    Status { number: u32, slug: String },
    /// Delete a sprint's state and lock files
    Reset {
        number: u32,
        slug: String,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let config = match cli.config {
        Some(ref path) => HuddleConfig::load(path)?,
        None => HuddleConfig::load_or_default(&project_dir)?,
    };

    let _log_guard = init_tracing(&project_dir, &config, cli.verbose)?;

    match cli.command {
        Commands::Run {
            number,
            slug,
            label,
            milestone,
            issue,
        } => cmd_run(config, project_dir, number, &slug, label, milestone, issue).await,
        Commands::Status { number, slug } => cmd_status(&config, &project_dir, number, &slug),
        Commands::Reset {
            number,
            slug,
            force,
        } => cmd_reset(&config, &project_dir, number, &slug, force),
    }
}

/// Stderr gets human-readable logs; the log directory gets JSON lines.
fn init_tracing(
    project_dir: &PathBuf,
    config: &HuddleConfig,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = project_dir.join(&config.paths.log_dir);
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "huddle.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "huddle=debug" } else { "huddle=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn cmd_run(
    config: HuddleConfig,
    project_dir: PathBuf,
    number: u32,
    slug: &str,
    labels: Vec<String>,
    milestone: Option<String>,
    issue_numbers: Vec<u64>,
) -> Result<()> {
    config.validate()?;

    let tracker: Arc<dyn IssueTracker> =
        Arc::new(GhClient::new(&config.tracker.cmd, project_dir.clone()));

    let issues = if !issue_numbers.is_empty() {
        let mut selected = Vec::new();
        for issue_number in issue_numbers {
            selected.push(tracker.get_issue(issue_number).await?);
        }
        selected
    } else {
        tracker
            .list_issues(&labels, Some("open"), milestone.as_deref())
            .await?
    };
    if issues.is_empty() {
        anyhow::bail!("No issues matched the selection; nothing to run");
    }

    let provider: Arc<dyn SessionProvider> =
        Arc::new(CliAgentProvider::new(config.agent.clone(), project_dir.clone()));
    let workspace: Arc<dyn Workspace> = Arc::new(GitWorkspace::open(&project_dir)?);

    let bus = Arc::new(EventBus::new());
    attach_console_printer(&bus);
    Arc::new(Notifier::new(config.notify.webhook_url.clone())).attach(&bus);

    println!(
        "{} sprint {}-{} over {} issues",
        style("Starting").bold().green(),
        slug,
        number,
        issues.len()
    );

    let plan = SprintPlan {
        issues: issues
            .into_iter()
            .map(|i| PlannedIssue::new(i.number, &i.title, &i.body))
            .collect(),
        execution_groups: Vec::new(),
    };

    let runner = SprintRunner::new(
        config,
        project_dir,
        number,
        slug,
        plan,
        RunnerHandles {
            provider,
            tracker,
            workspace,
            bus,
        },
    )?;

    runner.start().await?;

    let state = runner.get_state().await;
    let completed = state
        .results
        .iter()
        .filter(|r| r.status == huddle::state::IssueStatus::Completed)
        .count();
    println!(
        "\n{}: {}/{} issues completed, {} drift incidents",
        style("Sprint finished").bold(),
        completed,
        state.results.len(),
        state.drift_incidents
    );
    Ok(())
}

fn cmd_status(
    config: &HuddleConfig,
    project_dir: &PathBuf,
    number: u32,
    slug: &str,
) -> Result<()> {
    let store = StateStore::new(
        project_dir
            .join(&config.paths.docs_dir)
            .join(format!("sprint-{}-{}.json", slug, number)),
    );
    if !store.exists() {
        println!("No state found for sprint {}-{}", slug, number);
        return Ok(());
    }

    let state = store.load()?;
    println!(
        "Sprint {}-{}: {} (started {})",
        slug,
        number,
        style(state.phase).bold(),
        state.started_at.format("%Y-%m-%d %H:%M")
    );
    println!(
        "Issues: {} planned, {} terminal, {} drift incidents",
        state.plan.issues.len(),
        state.results.len(),
        state.drift_incidents
    );
    for entry in &state.results {
        let mark = match entry.status {
            huddle::state::IssueStatus::Completed => style("✓").green(),
            huddle::state::IssueStatus::Failed => style("✗").red(),
        };
        println!(
            "  {} #{} {} (retries: {})",
            mark, entry.issue_number, entry.title, entry.retry_count
        );
    }
    Ok(())
}

fn cmd_reset(
    config: &HuddleConfig,
    project_dir: &PathBuf,
    number: u32,
    slug: &str,
    force: bool,
) -> Result<()> {
    let docs_dir = project_dir.join(&config.paths.docs_dir);
    let base = format!("sprint-{}-{}", slug, number);
    let state_path = docs_dir.join(format!("{}.json", base));
    let lock_path = docs_dir.join(format!("{}.lock", base));

    if !state_path.exists() && !lock_path.exists() {
        println!("Nothing to reset for sprint {}-{}", slug, number);
        return Ok(());
    }

    if !force {
        let confirmed = dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt(format!("Delete state for sprint {}-{}?", slug, number))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted");
            return Ok(());
        }
    }

    for path in [state_path, lock_path] {
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    println!("Reset sprint {}-{}", slug, number);
    Ok(())
}

/// Live event feed for the terminal.
fn attach_console_printer(bus: &EventBus) {
    bus.subscribe_many(
        &[
            EventKind::PhaseChange,
            EventKind::IssueFail,
            EventKind::IssueSucceed,
            EventKind::SprintPaused,
            EventKind::SprintResumed,
            EventKind::SprintComplete,
            EventKind::SprintError,
        ],
        |event| match event {
            SprintEvent::PhaseChanged { from, to } => {
                println!("{} {} -> {}", style("phase").cyan(), from, to);
            }
            SprintEvent::IssueSucceeded { issue_number, title } => {
                println!("{} #{} {}", style("✓").green(), issue_number, title);
            }
            SprintEvent::IssueFailed {
                issue_number,
                title,
                reason,
            } => {
                println!("{} #{} {}: {}", style("✗").red(), issue_number, title, reason);
            }
            SprintEvent::SprintPaused { phase } => {
                println!("{} at {}", style("paused").yellow(), phase);
            }
            SprintEvent::SprintResumed { phase } => {
                println!("{} at {}", style("resumed").yellow(), phase);
            }
            SprintEvent::SprintComplete { sprint_number } => {
                println!("{} sprint {}", style("complete").bold().green(), sprint_number);
            }
            SprintEvent::SprintError { message } => {
                println!("{} {}", style("error").bold().red(), message);
            }
        },
    );
}
