//! The sprint runner.
//!
//! Owns the phase state machine, the per-issue execution loop, pause and
//! resume control, and the event bus feed. The runner is the only writer
//! of sprint state: every mutation goes through `transition` or a helper
//! that persists before announcing, so a crash never loses more than the
//! in-flight step. Concurrency is bounded by the session pool; at most one
//! engine instance may hold a sprint's lock at a time.

use crate::config::{DriftPolicy, HuddleConfig};
use crate::drift::{DriftDetector, DriftReport};
use crate::errors::{EngineError, IssueError};
use crate::events::{EventBus, SprintEvent};
use crate::gate::{QualityGate, QualityResult};
use crate::huddle::{self, SprintLog};
use crate::review::{ChallengerReview, ChallengerVerdict};
use crate::session::{PooledSession, SessionOptions, SessionPool, SessionProvider};
use crate::sprint::prompts;
use crate::sprint::{PlannedIssue, SprintPlan};
use crate::state::{
    HuddleEntry, IssueStatus, SprintLock, SprintPhase, SprintState, StateStore,
};
use crate::tracker::git::Workspace;
use crate::tracker::{IssueTracker, IssueUpdate};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Label requested from the tracker when an issue exhausts its retries.
const BLOCKED_LABEL: &str = "huddle-blocked";

/// The collaborators a runner is wired to. Seamed as traits so the engine
/// is testable without real agent, tracker, or git processes.
pub struct RunnerHandles {
    pub provider: Arc<dyn SessionProvider>,
    pub tracker: Arc<dyn IssueTracker>,
    pub workspace: Arc<dyn Workspace>,
    pub bus: Arc<EventBus>,
}

/// Captures what an attempt produced, for the terminal huddle entry.
/// Shared with the in-session closure through a mutex.
#[derive(Debug, Default, Clone)]
struct AttemptData {
    quality: Option<QualityResult>,
    review: Option<ChallengerVerdict>,
    files: Vec<String>,
    /// A drifting issue counts once against the sprint-wide budget,
    /// however many of its attempts drift.
    drift_recorded: bool,
}

pub struct SprintRunner {
    config: HuddleConfig,
    project_dir: PathBuf,
    pool: Arc<SessionPool>,
    tracker: Arc<dyn IssueTracker>,
    workspace: Arc<dyn Workspace>,
    bus: Arc<EventBus>,
    challenger: ChallengerReview,
    gate: QualityGate,
    drift: DriftDetector,
    store: StateStore,
    log: SprintLog,
    state: Mutex<SprintState>,
    paused_tx: watch::Sender<bool>,
    paused_rx: watch::Receiver<bool>,
    /// Set when the drift-incident budget is exhausted; checked between
    /// dispatches so in-flight work finishes naturally.
    abort: AtomicBool,
    _lock: SprintLock,
}

impl SprintRunner {
    /// Build a runner for one sprint, acquiring its lock and loading any
    /// persisted state from a previous run. When persisted state exists,
    /// the passed plan is ignored in favor of the stored one.
    pub fn new(
        config: HuddleConfig,
        project_dir: PathBuf,
        sprint_number: u32,
        slug: &str,
        plan: SprintPlan,
        handles: RunnerHandles,
    ) -> Result<Arc<Self>, EngineError> {
        config.validate()?;

        let docs_dir = project_dir.join(&config.paths.docs_dir);
        let base = format!("sprint-{}-{}", slug, sprint_number);
        let sprint_id = format!("{}-{}", slug, sprint_number);

        let lock = SprintLock::acquire(docs_dir.join(format!("{}.lock", base)), &sprint_id)?;
        let store = StateStore::new(docs_dir.join(format!("{}.json", base)));

        let state = if store.exists() {
            let loaded = store.load()?;
            info!(phase = %loaded.phase, "resuming persisted sprint state");
            loaded
        } else {
            SprintState::new(sprint_number, slug, plan)
        };

        let (paused_tx, paused_rx) = watch::channel(false);

        Ok(Arc::new(Self {
            pool: Arc::new(SessionPool::new(
                handles.provider.clone(),
                config.sprint.max_concurrent_sessions,
            )),
            challenger: ChallengerReview::new(handles.provider),
            tracker: handles.tracker,
            workspace: handles.workspace,
            bus: handles.bus,
            gate: QualityGate::new(config.gate.clone()),
            drift: DriftDetector::new(config.drift.threshold),
            log: SprintLog::new(docs_dir.join(format!("{}.log.md", base))),
            store,
            state: Mutex::new(state),
            paused_tx,
            paused_rx,
            abort: AtomicBool::new(false),
            _lock: lock,
            config,
            project_dir,
        }))
    }

    /// Read-only snapshot of the sprint state.
    pub async fn get_state(&self) -> SprintState {
        self.state.lock().await.clone()
    }

    /// Advisory pool counters, for dashboards.
    pub fn pool_stats(&self) -> crate::session::PoolStats {
        self.pool.get_stats()
    }

    /// Drive the sprint from its current phase to a terminal one.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let result = self.run_phases().await;
        self.pool.drain_all().await;

        if let Err(ref e) = result {
            let message = e.to_string();
            error!(error = %message, "sprint aborted");
            if let Err(te) = self.transition(SprintPhase::Failed).await {
                debug!(error = %te, "sprint already terminal while failing");
            }
            self.bus.emit(SprintEvent::SprintError { message });
        }
        result
    }

    /// Suspend at the current phase. Legal except when already paused or
    /// terminal. In-flight per-issue work is never interrupted; it
    /// completes or fails naturally while the phase holds at paused.
    pub async fn pause(&self) -> Result<(), EngineError> {
        let held = {
            let st = self.state.lock().await;
            if st.phase == SprintPhase::Paused {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "sprint is already paused"
                )));
            }
            if st.phase.is_terminal() {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "cannot pause a {} sprint",
                    st.phase
                )));
            }
            st.phase
        };

        self.transition(SprintPhase::Paused).await?;
        let _ = self.paused_tx.send(true);
        self.bus.emit(SprintEvent::SprintPaused { phase: held });
        Ok(())
    }

    /// Restore the phase held before pausing.
    pub async fn resume(&self) -> Result<(), EngineError> {
        let held = {
            let st = self.state.lock().await;
            if st.phase != SprintPhase::Paused {
                return Err(EngineError::Other(anyhow::anyhow!("sprint is not paused")));
            }
            st.paused_from.ok_or_else(|| {
                EngineError::Other(anyhow::anyhow!("paused sprint lost its suspension phase"))
            })?
        };

        self.transition(held).await?;
        let _ = self.paused_tx.send(false);
        self.bus.emit(SprintEvent::SprintResumed { phase: held });
        Ok(())
    }

    /// The sole phase mutation point: validates legality, persists, then
    /// emits. Transitions are serialized by the state mutex.
    async fn transition(&self, next: SprintPhase) -> Result<(), EngineError> {
        let from = {
            let mut st = self.state.lock().await;
            let from = st.phase;
            if !from.can_transition_to(next) {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "illegal phase transition {} -> {}",
                    from,
                    next
                )));
            }
            if next == SprintPhase::Paused {
                st.paused_from = Some(from);
            } else if from == SprintPhase::Paused {
                st.paused_from = None;
            }
            st.phase = next;
            self.store.save(&st)?;
            from
        };

        info!(%from, to = %next, "phase transition");
        self.bus.emit(SprintEvent::PhaseChanged { from, to: next });
        Ok(())
    }

    async fn run_phases(self: &Arc<Self>) -> Result<(), EngineError> {
        // A crash while paused persists the paused phase; pick the
        // suspended phase back up on restart.
        let held = {
            let st = self.state.lock().await;
            (st.phase == SprintPhase::Paused).then_some(st.paused_from).flatten()
        };
        if let Some(from) = held
            && !*self.paused_rx.borrow()
        {
            self.transition(from).await?;
        }

        loop {
            self.wait_if_paused().await;
            let phase = self.state.lock().await.phase;

            match phase {
                SprintPhase::Init => self.transition(SprintPhase::Refine).await?,
                SprintPhase::Refine => {
                    self.run_refine().await?;
                    // A pause that landed during the phase work must be
                    // served before the forward transition, or the runner
                    // would move on with the pause flag still set.
                    self.wait_if_paused().await;
                    self.transition(SprintPhase::Plan).await?;
                }
                SprintPhase::Plan => {
                    self.run_plan().await?;
                    self.wait_if_paused().await;
                    self.transition(SprintPhase::Execute).await?;
                }
                SprintPhase::Execute => {
                    self.run_execute().await?;
                    self.wait_if_paused().await;
                    self.transition(SprintPhase::Review).await?;
                }
                SprintPhase::Review => {
                    self.run_review().await;
                    self.wait_if_paused().await;
                    self.transition(SprintPhase::Retro).await?;
                }
                SprintPhase::Retro => {
                    self.run_retro().await;
                    self.wait_if_paused().await;
                    self.transition(SprintPhase::Complete).await?;
                    let sprint_number = self.state.lock().await.sprint_number;
                    self.bus.emit(SprintEvent::SprintComplete { sprint_number });
                    return Ok(());
                }
                SprintPhase::Paused => {
                    self.wait_if_paused().await;
                }
                SprintPhase::Failed | SprintPhase::Complete => {
                    info!(%phase, "sprint already terminal; nothing to run");
                    return Ok(());
                }
            }
        }
    }

    async fn wait_if_paused(&self) {
        let mut rx = self.paused_rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run one pooled agent exchange for a phase-level task.
    async fn run_phase_session(
        &self,
        options: &SessionOptions,
        prompt: &str,
    ) -> Result<String, IssueError> {
        let pool = self.pool.clone();
        let prompt = prompt.to_string();
        self.pool
            .execute_in_session(options, move |session| async move {
                pool.run_in(&session, &prompt).await
            })
            .await
    }

    /// Refine phase: rewrite each issue body through an agent session and
    /// push the refinement to the tracker. Refinement is an enrichment
    /// pass; a failed session keeps the original body.
    async fn run_refine(self: &Arc<Self>) -> Result<(), EngineError> {
        let issues = self.state.lock().await.plan.issues.clone();

        for issue in issues {
            self.wait_if_paused().await;
            let options = SessionOptions::for_issue("refine", issue.number);
            let prompt = prompts::build_refine_prompt(&issue);

            match self.run_phase_session(&options, &prompt).await {
                Ok(body) if !body.trim().is_empty() => {
                    let body = body.trim().to_string();
                    {
                        let mut st = self.state.lock().await;
                        if let Some(planned) = st.plan.issue_mut(issue.number) {
                            planned.body = body.clone();
                        }
                        self.store.save(&st)?;
                    }
                    let update = IssueUpdate {
                        body: Some(body),
                        ..Default::default()
                    };
                    if let Err(e) = self.tracker.update_issue(issue.number, update).await {
                        warn!(issue = issue.number, error = %e, "tracker update failed; keeping local refinement");
                    }
                }
                Ok(_) => {
                    warn!(issue = issue.number, "empty refinement; keeping original body");
                }
                Err(e) => {
                    warn!(issue = issue.number, error = %e, "refine session failed; keeping original body");
                }
            }
        }
        Ok(())
    }

    /// Plan phase: one agent session produces the expected-file map and
    /// execution groups. An unusable plan aborts the sprint.
    async fn run_plan(self: &Arc<Self>) -> Result<(), EngineError> {
        let issues = self.state.lock().await.plan.issues.clone();
        let prompt = prompts::build_plan_prompt(&issues);
        let options = SessionOptions::for_phase("plan");

        let output = self
            .run_phase_session(&options, &prompt)
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("planning session failed: {}", e)))?;
        let update = prompts::parse_plan_response(&output).map_err(EngineError::Other)?;

        let mut st = self.state.lock().await;
        for scope in update.issues {
            if let Some(issue) = st.plan.issue_mut(scope.number) {
                issue.expected_files = scope.expected_files;
                if scope.branch.is_some() {
                    issue.branch = scope.branch;
                }
            }
        }
        if !update.execution_groups.is_empty() {
            st.plan.execution_groups = update.execution_groups;
        }
        self.store.save(&st)?;
        Ok(())
    }

    /// Execute phase: dispatch each group's issues concurrently, bounded
    /// by the session pool, and wait for the group to drain before moving
    /// to the next.
    async fn run_execute(self: &Arc<Self>) -> Result<(), EngineError> {
        let groups = self.state.lock().await.plan.effective_groups();

        for group in groups {
            let mut tasks: JoinSet<()> = JoinSet::new();

            for number in group {
                if self.abort.load(Ordering::SeqCst) {
                    break;
                }
                self.wait_if_paused().await;

                let issue = {
                    let st = self.state.lock().await;
                    if st.results.iter().any(|r| r.issue_number == number) {
                        debug!(issue = number, "already terminal; skipping");
                        None
                    } else {
                        st.plan.issue(number).cloned()
                    }
                };
                let Some(issue) = issue else { continue };

                let runner = self.clone();
                tasks.spawn(async move { runner.run_issue(issue).await });
                // Let the task claim its pool slot before the next one is
                // dispatched, keeping FIFO order within the group.
                tokio::task::yield_now().await;
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "issue task panicked");
                }
            }

            if self.abort.load(Ordering::SeqCst) {
                let incidents = self.state.lock().await.drift_incidents;
                return Err(EngineError::DriftBudgetExhausted {
                    incidents,
                    max: self.config.drift.max_incidents,
                });
            }
        }
        Ok(())
    }

    /// The full attempt-and-retry loop for one issue. Never aborts the
    /// sprint; its terminal outcome is recorded as a huddle entry.
    async fn run_issue(self: Arc<Self>, issue: PlannedIssue) {
        info!(issue = issue.number, title = %issue.title, "issue dispatched");
        let started = Instant::now();
        let max_retries = self.config.sprint.max_retries;
        let data = Arc::new(std::sync::Mutex::new(AttemptData::default()));
        let mut retry_count = 0u32;

        let outcome = loop {
            match self.run_attempt(&issue, &data).await {
                Ok(()) => break Ok(()),
                Err(e) => {
                    if retry_count >= max_retries {
                        break Err(e);
                    }
                    retry_count += 1;
                    warn!(
                        issue = issue.number,
                        retry = retry_count,
                        error = %e,
                        "attempt failed; retrying"
                    );
                }
            }
        };

        let captured = data.lock().unwrap().clone();
        let entry = HuddleEntry {
            issue_number: issue.number,
            title: issue.title.clone(),
            status: if outcome.is_ok() {
                IssueStatus::Completed
            } else {
                IssueStatus::Failed
            },
            quality_result: captured.quality,
            code_review: captured.review,
            duration_secs: started.elapsed().as_secs(),
            files_changed: captured.files,
            timestamp: Utc::now(),
            retry_count,
            error_message: outcome.as_ref().err().map(|e| e.reason()),
        };

        self.finish_issue(&issue, entry).await;
    }

    /// One attempt: hold a session for the agent task, then drift-check,
    /// quality-gate, and challenger-review the result.
    async fn run_attempt(
        self: &Arc<Self>,
        issue: &PlannedIssue,
        data: &Arc<std::sync::Mutex<AttemptData>>,
    ) -> Result<(), IssueError> {
        {
            let mut d = data.lock().unwrap();
            d.quality = None;
            d.review = None;
        }

        let options = SessionOptions::for_issue("implement", issue.number);
        let runner = self.clone();
        let issue = issue.clone();
        let data = data.clone();
        self.pool
            .execute_in_session(&options, move |session| async move {
                runner.attempt_in_session(&session, &issue, &data).await
            })
            .await
    }

    async fn attempt_in_session(
        self: &Arc<Self>,
        session: &PooledSession,
        issue: &PlannedIssue,
        data: &Arc<std::sync::Mutex<AttemptData>>,
    ) -> Result<(), IssueError> {
        let snapshot = self
            .workspace
            .snapshot(&format!("before issue #{}", issue.number))
            .map_err(|e| IssueError::Tool(e.to_string()))?;

        let prompt = prompts::build_implement_prompt(issue);
        self.pool.run_in(session, &prompt).await?;

        let changes = self
            .workspace
            .changes_since(&snapshot)
            .map_err(|e| IssueError::Tool(e.to_string()))?;
        data.lock().unwrap().files = changes.files.clone();

        let report = self.drift.analyze(&issue.expected_files, &changes.files);
        if self.drift.exceeds(&report) {
            self.handle_drift(issue, &report, &snapshot, data).await?;
        }

        let quality = self.gate.run(&self.project_dir, changes.lines_changed).await;
        let passed = quality.passed;
        let summary = quality.summary();
        data.lock().unwrap().quality = Some(quality);
        if !passed {
            return Err(IssueError::QualityGate { summary });
        }

        if self.config.sprint.challenger_enabled {
            let verdict = self.challenger.review(issue, &changes).await?;
            let approved = verdict.approved;
            let feedback = verdict.feedback.clone();
            data.lock().unwrap().review = Some(verdict);
            if !approved {
                return Err(IssueError::ChallengerRejected { feedback });
            }
        }

        Ok(())
    }

    /// Apply the configured drift policy. `Ok(())` means the operator
    /// accepted the drift and the attempt proceeds to the gate.
    async fn handle_drift(
        &self,
        issue: &PlannedIssue,
        report: &DriftReport,
        snapshot: &str,
        data: &Arc<std::sync::Mutex<AttemptData>>,
    ) -> Result<(), IssueError> {
        let first_for_issue = {
            let mut d = data.lock().unwrap();
            let first = !d.drift_recorded;
            d.drift_recorded = true;
            first
        };
        if first_for_issue {
            self.record_drift_incident(issue.number).await;
        }

        let exceeded = IssueError::DriftExceeded {
            percentage: report.drift_percentage * 100.0,
            threshold: self.drift.threshold() * 100.0,
            unplanned: report.unplanned_count(),
        };

        match self.config.drift.policy {
            DriftPolicy::Revert => {
                if let Err(e) = self.workspace.revert_to(snapshot) {
                    warn!(issue = issue.number, error = %e, "revert after drift failed");
                }
                Err(exceeded)
            }
            DriftPolicy::Halt => {
                if self.confirm_drift(issue, report).await {
                    info!(issue = issue.number, "operator accepted drift");
                    Ok(())
                } else {
                    Err(exceeded)
                }
            }
        }
    }

    async fn record_drift_incident(&self, issue_number: u64) {
        let incidents = {
            let mut st = self.state.lock().await;
            st.drift_incidents += 1;
            if let Err(e) = self.store.save(&st) {
                warn!(error = %e, "failed to persist drift incident");
            }
            st.drift_incidents
        };
        warn!(issue = issue_number, incidents, "drift incident recorded");
        if incidents > self.config.drift.max_incidents {
            self.abort.store(true, Ordering::SeqCst);
        }
    }

    /// Halt policy: ask the operator whether to accept the drift. A
    /// declined or failed prompt fails the attempt.
    async fn confirm_drift(&self, issue: &PlannedIssue, report: &DriftReport) -> bool {
        let prompt = format!(
            "Issue #{} drifted {:.0}% ({} unplanned files). Proceed anyway?",
            issue.number,
            report.drift_percentage * 100.0,
            report.unplanned_count()
        );
        tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }

    /// Record the terminal outcome: huddle comment and log, blocked label
    /// on failure, state append in completion order, then the event.
    async fn finish_issue(&self, issue: &PlannedIssue, entry: HuddleEntry) {
        let comment = huddle::format_comment(&entry);
        if let Err(e) = self.tracker.add_comment(issue.number, &comment).await {
            warn!(issue = issue.number, error = %e, "failed to post huddle comment");
        }
        if entry.status == IssueStatus::Failed
            && let Err(e) = self.tracker.set_label(issue.number, BLOCKED_LABEL).await
        {
            warn!(issue = issue.number, error = %e, "failed to set blocked label");
        }
        if let Err(e) = self.log.append_entry(&entry) {
            warn!(issue = issue.number, error = %e, "failed to append sprint log entry");
        }

        let persist = {
            let mut st = self.state.lock().await;
            st.results.push(entry.clone());
            self.store.save(&st)
        };
        if let Err(e) = persist {
            warn!(issue = issue.number, error = %e, "failed to persist issue result");
        }

        match entry.status {
            IssueStatus::Completed => {
                info!(issue = issue.number, retries = entry.retry_count, "issue completed");
                self.bus.emit(SprintEvent::IssueSucceeded {
                    issue_number: issue.number,
                    title: issue.title.clone(),
                });
            }
            IssueStatus::Failed => {
                let reason = entry
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                warn!(issue = issue.number, %reason, "issue failed");
                self.bus.emit(SprintEvent::IssueFailed {
                    issue_number: issue.number,
                    title: issue.title.clone(),
                    reason,
                });
            }
        }
    }

    /// Review phase: summarize the sprint into the log. Best-effort; a
    /// failed summary session is logged and skipped.
    async fn run_review(self: &Arc<Self>) {
        let state = self.get_state().await;
        let prompt = prompts::build_review_prompt(&state);
        let options = SessionOptions::for_phase("review");

        match self.run_phase_session(&options, &prompt).await {
            Ok(summary) => {
                let text = format!(
                    "## Sprint {} summary\n\n{}\n",
                    state.sprint_number,
                    summary.trim()
                );
                if let Err(e) = self.log.append_text(&text) {
                    warn!(error = %e, "failed to append sprint summary");
                }
            }
            Err(e) => warn!(error = %e, "review session failed; skipping summary"),
        }
    }

    /// Retro phase: append the retrospective to the log. Best-effort.
    async fn run_retro(self: &Arc<Self>) {
        let state = self.get_state().await;
        let prompt = prompts::build_retro_prompt(&state);
        let options = SessionOptions::for_phase("retro");

        match self.run_phase_session(&options, &prompt).await {
            Ok(retro) => {
                let text = format!(
                    "## Sprint {} retrospective\n\n{}\n",
                    state.sprint_number,
                    retro.trim()
                );
                if let Err(e) = self.log.append_text(&text) {
                    warn!(error = %e, "failed to append retrospective");
                }
            }
            Err(e) => warn!(error = %e, "retro session failed; skipping retrospective"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::errors::IssueError;
    use crate::events::EventKind;
    use crate::session::testing::MockProvider;
    use crate::tracker::git::ChangeSet;
    use crate::tracker::{Issue, Label, Milestone, PullRequest};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    // =========================================
    // Collaborator doubles
    // =========================================

    struct MockTracker {
        ops: StdMutex<Vec<String>>,
    }

    impl MockTracker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ops: StdMutex::new(Vec::new()),
            })
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }
    }

    #[async_trait]
    impl IssueTracker for MockTracker {
        async fn get_issue(&self, number: u64) -> Result<Issue, EngineError> {
            Ok(Issue {
                number,
                title: format!("issue {}", number),
                body: String::new(),
                state: "open".to_string(),
                labels: Vec::new(),
            })
        }

        async fn list_issues(
            &self,
            _labels: &[String],
            _state: Option<&str>,
            _milestone: Option<&str>,
        ) -> Result<Vec<Issue>, EngineError> {
            Ok(Vec::new())
        }

        async fn create_issue(
            &self,
            _title: &str,
            _body: &str,
            _labels: &[String],
        ) -> Result<u64, EngineError> {
            Ok(1)
        }

        async fn update_issue(&self, number: u64, _update: IssueUpdate) -> Result<(), EngineError> {
            self.record(format!("update:{}", number));
            Ok(())
        }

        async fn add_comment(&self, number: u64, _body: &str) -> Result<(), EngineError> {
            self.record(format!("comment:{}", number));
            Ok(())
        }

        async fn set_label(&self, number: u64, label: &str) -> Result<(), EngineError> {
            self.record(format!("label:{}:{}", number, label));
            Ok(())
        }

        async fn remove_label(&self, number: u64, label: &str) -> Result<(), EngineError> {
            self.record(format!("unlabel:{}:{}", number, label));
            Ok(())
        }

        async fn get_labels(&self, _number: u64) -> Result<Vec<Label>, EngineError> {
            Ok(Vec::new())
        }

        async fn create_milestone(&self, title: &str) -> Result<Milestone, EngineError> {
            Ok(Milestone {
                number: 1,
                title: title.to_string(),
                state: "open".to_string(),
            })
        }

        async fn get_milestone(&self, number: u64) -> Result<Milestone, EngineError> {
            Ok(Milestone {
                number,
                title: "m".to_string(),
                state: "open".to_string(),
            })
        }

        async fn set_milestone(&self, _issue: u64, _title: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn close_milestone(&self, _number: u64) -> Result<(), EngineError> {
            Ok(())
        }

        async fn list_pull_requests(
            &self,
            _state: Option<&str>,
            _base: Option<&str>,
            _head: Option<&str>,
        ) -> Result<Vec<PullRequest>, EngineError> {
            Ok(Vec::new())
        }
    }

    struct MockWorkspace {
        changes: StdMutex<ChangeSet>,
        snapshots: AtomicUsize,
        reverts: AtomicUsize,
    }

    impl MockWorkspace {
        fn new(files: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                changes: StdMutex::new(ChangeSet {
                    files: files.iter().map(|s| s.to_string()).collect(),
                    lines_changed: 5,
                }),
                snapshots: AtomicUsize::new(0),
                reverts: AtomicUsize::new(0),
            })
        }

        fn revert_count(&self) -> usize {
            self.reverts.load(Ordering::SeqCst)
        }
    }

    impl Workspace for MockWorkspace {
        fn snapshot(&self, _label: &str) -> anyhow::Result<String> {
            let n = self.snapshots.fetch_add(1, Ordering::SeqCst);
            Ok(format!("snap-{}", n))
        }

        fn changes_since(&self, _snapshot: &str) -> anyhow::Result<ChangeSet> {
            Ok(self.changes.lock().unwrap().clone())
        }

        fn revert_to(&self, _snapshot: &str) -> anyhow::Result<()> {
            self.reverts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // =========================================
    // Test bed
    // =========================================

    fn test_config(gate_command: &str, capacity: usize, retries: u32, challenger: bool) -> HuddleConfig {
        let mut config = HuddleConfig::default();
        config.sprint.max_concurrent_sessions = capacity;
        config.sprint.max_retries = retries;
        config.sprint.challenger_enabled = challenger;
        config.gate.checks = vec![CheckConfig {
            name: "gate".to_string(),
            command: gate_command.to_string(),
            category: "tests".to_string(),
            enabled: true,
            timeout_secs: 30,
        }];
        config.gate.max_diff_lines = 0;
        config
    }

    fn plan_of(numbers: &[u64]) -> SprintPlan {
        SprintPlan {
            issues: numbers
                .iter()
                .map(|n| PlannedIssue::new(*n, &format!("Issue {}", n), "original body"))
                .collect(),
            execution_groups: Vec::new(),
        }
    }

    /// Respond like a cooperative planning/refine/review agent; implement
    /// prompts run `on_implement` and the rest echo fixed text.
    fn scripted_responder(
        plan_json: String,
        on_implement: impl Fn(u64) -> Result<String, IssueError> + Send + Sync + 'static,
    ) -> impl Fn(&str) -> Result<String, IssueError> + Send + Sync + 'static {
        move |prompt: &str| {
            if prompt.contains("# Sprint planning") {
                Ok(plan_json.clone())
            } else if prompt.contains("# Refine issue") {
                Ok("refined body".to_string())
            } else if prompt.contains("# Implement issue") {
                let number = prompt
                    .split("issue #")
                    .nth(1)
                    .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
                    .and_then(|digits| digits.parse().ok())
                    .expect("implement prompt names an issue");
                on_implement(number)
            } else {
                Ok("phase text".to_string())
            }
        }
    }

    fn collect_events(bus: &EventBus) -> Arc<StdMutex<Vec<String>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for kind in [
            EventKind::PhaseChange,
            EventKind::IssueFail,
            EventKind::IssueSucceed,
            EventKind::SprintPaused,
            EventKind::SprintResumed,
            EventKind::SprintComplete,
            EventKind::SprintError,
        ] {
            let seen = seen.clone();
            bus.subscribe(kind, move |event| {
                seen.lock().unwrap().push(format!("{:?}", event.kind()));
            });
        }
        seen
    }

    fn make_runner(
        dir: &TempDir,
        config: HuddleConfig,
        plan: SprintPlan,
        provider: Arc<MockProvider>,
        tracker: Arc<MockTracker>,
        workspace: Arc<MockWorkspace>,
        bus: Arc<EventBus>,
    ) -> Arc<SprintRunner> {
        SprintRunner::new(
            config,
            dir.path().to_path_buf(),
            1,
            "core",
            plan,
            RunnerHandles {
                provider,
                tracker,
                workspace,
                bus,
            },
        )
        .unwrap()
    }

    fn entry_for(state: &SprintState, number: u64) -> HuddleEntry {
        state
            .results
            .iter()
            .find(|r| r.issue_number == number)
            .cloned()
            .unwrap_or_else(|| panic!("no result for issue {}", number))
    }

    // =========================================
    // End-to-end scenarios
    // =========================================

    /// Two issues, concurrency 1, max retries 3. Issue 1's gate fails on
    /// attempts 1 and 2 and passes on attempt 3; issue 2 passes first
    /// try. Issue 2 is dispatched only after issue 1 releases its session
    /// and completes independently.
    #[tokio::test]
    async fn test_retry_until_gate_passes_with_fifo_dispatch() {
        let dir = TempDir::new().unwrap();

        // The implement step marks which issue the next gate run belongs
        // to; the gate fails issue 1 until its third run.
        let gate_cmd = r#"cur=$(cat current); n=$(cat count-$cur 2>/dev/null || echo 0); n=$((n+1)); echo $n > count-$cur; if [ "$cur" = "1" ]; then [ $n -ge 3 ]; else true; fi"#;

        let order = Arc::new(StdMutex::new(Vec::<u64>::new()));
        let provider = Arc::new(MockProvider::new());
        {
            let dir_path = dir.path().to_path_buf();
            let order = order.clone();
            provider.respond_with(scripted_responder(
                r#"{"issues": [
                    {"number": 1, "expected_files": ["src/a.rs"]},
                    {"number": 2, "expected_files": ["src/a.rs"]}],
                    "execution_groups": [[1, 2]]}"#
                    .to_string(),
                move |number| {
                    std::fs::write(dir_path.join("current"), number.to_string()).unwrap();
                    order.lock().unwrap().push(number);
                    Ok("implemented".to_string())
                },
            ));
        }

        let tracker = MockTracker::new();
        let workspace = MockWorkspace::new(&["src/a.rs"]);
        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let runner = make_runner(
            &dir,
            test_config(gate_cmd, 1, 3, false),
            plan_of(&[1, 2]),
            provider,
            tracker.clone(),
            workspace,
            bus,
        );

        runner.start().await.unwrap();

        let state = runner.get_state().await;
        assert_eq!(state.phase, SprintPhase::Complete);
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.drift_incidents, 0);

        let first = entry_for(&state, 1);
        assert_eq!(first.status, IssueStatus::Completed);
        assert_eq!(first.retry_count, 2);
        assert!(first.quality_result.unwrap().passed);

        let second = entry_for(&state, 2);
        assert_eq!(second.status, IssueStatus::Completed);
        assert_eq!(second.retry_count, 0);

        // Issue 1 was dispatched first; issue 2 only entered a session
        // after issue 1 released its slot.
        let order = order.lock().unwrap().clone();
        assert_eq!(order[0], 1);
        assert!(order.contains(&2));

        // Results are appended in completion order: issue 2 finished
        // while issue 1 was still retrying.
        assert_eq!(state.results[0].issue_number, 2);
        assert_eq!(state.results[1].issue_number, 1);

        let ops = tracker.ops();
        assert!(ops.contains(&"comment:1".to_string()));
        assert!(ops.contains(&"comment:2".to_string()));
        assert!(!ops.iter().any(|op| op.starts_with("label:")));

        let events = events.lock().unwrap().clone();
        assert_eq!(events.iter().filter(|e| *e == "IssueSucceed").count(), 2);
        assert!(events.contains(&"SprintComplete".to_string()));
        assert!(!events.contains(&"SprintError".to_string()));
    }

    /// A challenger rejection consumes the same retry budget as a gate
    /// failure; the second attempt's approval completes the issue.
    #[tokio::test]
    async fn test_challenger_rejection_retries_then_approves() {
        let dir = TempDir::new().unwrap();

        let challenges = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(MockProvider::new());
        {
            let challenges = challenges.clone();
            provider.respond_with(move |prompt| {
                if prompt.contains("# Adversarial Review") {
                    let n = challenges.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Ok("REJECTED: missing tests".to_string())
                    } else {
                        Ok("APPROVED: looks fine".to_string())
                    }
                } else if prompt.contains("# Sprint planning") {
                    Ok(r#"{"issues": [{"number": 7, "expected_files": ["src/a.rs"]}],
                        "execution_groups": [[7]]}"#
                        .to_string())
                } else {
                    Ok("ok".to_string())
                }
            });
        }

        let tracker = MockTracker::new();
        let workspace = MockWorkspace::new(&["src/a.rs"]);
        let bus = Arc::new(EventBus::new());

        let runner = make_runner(
            &dir,
            test_config("true", 1, 3, true),
            plan_of(&[7]),
            provider,
            tracker,
            workspace,
            bus,
        );

        runner.start().await.unwrap();

        let state = runner.get_state().await;
        let entry = entry_for(&state, 7);
        assert_eq!(entry.status, IssueStatus::Completed);
        assert_eq!(entry.retry_count, 1);
        let review = entry.code_review.unwrap();
        assert!(review.approved);
        assert_eq!(review.feedback, "looks fine");
        assert_eq!(challenges.load(Ordering::SeqCst), 2);
    }

    /// Retry exhaustion marks the issue failed, requests the blocked
    /// label, and never aborts the sprint.
    #[tokio::test]
    async fn test_session_timeouts_exhaust_retries_without_aborting_sprint() {
        let dir = TempDir::new().unwrap();

        let provider = Arc::new(MockProvider::new());
        provider.respond_with(scripted_responder(
            r#"{"issues": [{"number": 4, "expected_files": ["src/a.rs"]}],
                "execution_groups": [[4]]}"#
                .to_string(),
            |_| Err(IssueError::SessionTimeout { secs: 1 }),
        ));

        let tracker = MockTracker::new();
        let workspace = MockWorkspace::new(&["src/a.rs"]);
        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let runner = make_runner(
            &dir,
            test_config("true", 1, 2, false),
            plan_of(&[4]),
            provider,
            tracker.clone(),
            workspace,
            bus,
        );

        runner.start().await.unwrap();

        let state = runner.get_state().await;
        assert_eq!(state.phase, SprintPhase::Complete);

        let entry = entry_for(&state, 4);
        assert_eq!(entry.status, IssueStatus::Failed);
        assert_eq!(entry.retry_count, 2);
        assert!(entry.error_message.unwrap().contains("timed out"));

        assert!(tracker.ops().contains(&"label:4:huddle-blocked".to_string()));
        assert!(events.lock().unwrap().contains(&"IssueFail".to_string()));
    }

    /// Exceeding the sprint-wide drift budget aborts the sprint after the
    /// in-flight issue finishes; the branch is reverted on every drifting
    /// attempt under the revert policy.
    #[tokio::test]
    async fn test_drift_budget_exhaustion_aborts_sprint() {
        let dir = TempDir::new().unwrap();

        let provider = Arc::new(MockProvider::new());
        provider.respond_with(scripted_responder(
            // No expected files: every change is unplanned.
            r#"{"issues": [{"number": 5, "expected_files": []}],
                "execution_groups": [[5]]}"#
                .to_string(),
            |_| Ok("implemented".to_string()),
        ));

        let tracker = MockTracker::new();
        let workspace = MockWorkspace::new(&["rogue.rs"]);
        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let mut config = test_config("true", 1, 1, false);
        config.drift.max_incidents = 0;

        let runner = make_runner(
            &dir,
            config,
            plan_of(&[5]),
            provider,
            tracker,
            workspace.clone(),
            bus,
        );

        match runner.start().await {
            Err(EngineError::DriftBudgetExhausted { incidents, max }) => {
                assert_eq!(incidents, 1);
                assert_eq!(max, 0);
            }
            other => panic!("Expected DriftBudgetExhausted, got {:?}", other),
        }

        let state = runner.get_state().await;
        assert_eq!(state.phase, SprintPhase::Failed);
        assert_eq!(state.drift_incidents, 1);
        assert!(workspace.revert_count() >= 1);

        let entry = entry_for(&state, 5);
        assert_eq!(entry.status, IssueStatus::Failed);
        assert!(entry.error_message.unwrap().contains("Drift"));

        assert!(events.lock().unwrap().contains(&"SprintError".to_string()));
    }

    // =========================================
    // Pause / resume
    // =========================================

    #[tokio::test]
    async fn test_pause_and_resume_restore_held_phase() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(MockProvider::new());
        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let runner = make_runner(
            &dir,
            test_config("true", 1, 1, false),
            plan_of(&[1]),
            provider,
            MockTracker::new(),
            MockWorkspace::new(&[]),
            bus,
        );

        runner.pause().await.unwrap();
        {
            let state = runner.get_state().await;
            assert_eq!(state.phase, SprintPhase::Paused);
            assert_eq!(state.paused_from, Some(SprintPhase::Init));
        }
        assert!(runner.pause().await.is_err(), "double pause must fail");

        runner.resume().await.unwrap();
        {
            let state = runner.get_state().await;
            assert_eq!(state.phase, SprintPhase::Init);
            assert_eq!(state.paused_from, None);
        }
        assert!(runner.resume().await.is_err(), "resume without pause must fail");

        let events = events.lock().unwrap().clone();
        assert!(events.contains(&"SprintPaused".to_string()));
        assert!(events.contains(&"SprintResumed".to_string()));
    }

    // =========================================
    // Persistence and the singleton lock
    // =========================================

    #[tokio::test]
    async fn test_restart_loads_persisted_state_and_skips_done_work() {
        let dir = TempDir::new().unwrap();

        {
            let provider = Arc::new(MockProvider::new());
            provider.respond_with(scripted_responder(
                r#"{"issues": [{"number": 1, "expected_files": ["src/a.rs"]}],
                    "execution_groups": [[1]]}"#
                    .to_string(),
                |_| Ok("implemented".to_string()),
            ));
            let runner = make_runner(
                &dir,
                test_config("true", 1, 1, false),
                plan_of(&[1]),
                provider,
                MockTracker::new(),
                MockWorkspace::new(&["src/a.rs"]),
                Arc::new(EventBus::new()),
            );
            runner.start().await.unwrap();
        }

        // The first engine instance is gone; a new one picks up the
        // persisted terminal state and does no further work.
        let provider = Arc::new(MockProvider::new());
        let runner = make_runner(
            &dir,
            test_config("true", 1, 1, false),
            plan_of(&[1]),
            provider.clone(),
            MockTracker::new(),
            MockWorkspace::new(&["src/a.rs"]),
            Arc::new(EventBus::new()),
        );

        let state = runner.get_state().await;
        assert_eq!(state.phase, SprintPhase::Complete);
        assert_eq!(state.results.len(), 1);

        runner.start().await.unwrap();
        assert_eq!(provider.open_count(), 0, "terminal sprint must not open sessions");
    }

    #[tokio::test]
    async fn test_second_engine_instance_hits_lock_contention() {
        let dir = TempDir::new().unwrap();

        let _held = make_runner(
            &dir,
            test_config("true", 1, 1, false),
            plan_of(&[1]),
            Arc::new(MockProvider::new()),
            MockTracker::new(),
            MockWorkspace::new(&[]),
            Arc::new(EventBus::new()),
        );

        let second = SprintRunner::new(
            test_config("true", 1, 1, false),
            dir.path().to_path_buf(),
            1,
            "core",
            plan_of(&[1]),
            RunnerHandles {
                provider: Arc::new(MockProvider::new()),
                tracker: MockTracker::new(),
                workspace: MockWorkspace::new(&[]),
                bus: Arc::new(EventBus::new()),
            },
        );

        match second {
            Err(EngineError::LockContention { sprint, .. }) => {
                assert_eq!(sprint, "core-1");
            }
            other => panic!("Expected LockContention, got {:?}", other.map(|_| ())),
        }
    }
}
