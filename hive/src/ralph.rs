//! The Ralph loop: one worker repeatedly claims a task, runs an agent on it
//! in an isolated workspace, and reconciles the outcome.
//!
//! One iteration walks claim → provision → context → spawn → supervise →
//! reconcile. Every failure after the claim becomes a tracker status update
//! and the loop moves on; nothing inside an iteration aborts the worker.
//! Once a session has been started it is killed on every exit path, and the
//! worker's registry entry is removed exactly once at the end of every
//! iteration that claimed a task.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, info_span, instrument, warn};

use crate::core::liveness::{Disposition, disposition, spawn_is_alive};
use crate::core::naming::{branch_name, session_name};
use crate::core::types::{TaskOutcome, TaskStatus, WorkerRecord};
use crate::io::clock::Clock;
use crate::io::config::HiveConfig;
use crate::io::context::{ContextSettings, write_agent_context};
use crate::io::init::HivePaths;
use crate::io::lock::FileLock;
use crate::io::plan::plan_for_context;
use crate::io::process::CommandRunner;
use crate::io::registry::Registry;
use crate::io::session::Tmux;
use crate::io::tracker::Tracker;
use crate::io::workspace::{MergeResult, WorkspaceManager};

/// Per-invocation overrides of the `[workers]`/`[agent]` config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkOverrides {
    pub poll_interval: Option<u64>,
    pub task_timeout: Option<u64>,
    pub spawn_grace: Option<u64>,
    pub agent_command: Option<String>,
}

/// Resolved settings for one worker.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub worker_id: String,
    pub default_branch: String,
    pub agent_command: String,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub spawn_grace: Duration,
    pub claim_retry_delay: Duration,
    pub activity_min_lines: usize,
    pub tracker_command: String,
    pub context_file: String,
    pub workspaces_base_dir: String,
}

impl LoopSettings {
    pub fn from_config(
        worker_id: impl Into<String>,
        cfg: &HiveConfig,
        default_branch: impl Into<String>,
        overrides: &WorkOverrides,
    ) -> Self {
        let w = &cfg.workers;
        Self {
            worker_id: worker_id.into(),
            default_branch: default_branch.into(),
            agent_command: overrides
                .agent_command
                .clone()
                .unwrap_or_else(|| cfg.agent.command.clone()),
            poll_interval: Duration::from_secs(overrides.poll_interval.unwrap_or(w.poll_interval)),
            task_timeout: Duration::from_secs(overrides.task_timeout.unwrap_or(w.task_timeout)),
            spawn_grace: Duration::from_secs(
                overrides
                    .spawn_grace
                    .unwrap_or(w.spawn_grace_period_seconds),
            ),
            claim_retry_delay: Duration::from_secs(w.claim_retry_delay_seconds),
            activity_min_lines: w.activity_min_lines,
            tracker_command: cfg.tracker.command.clone(),
            context_file: cfg.agent.context_file.clone(),
            workspaces_base_dir: cfg.worktrees.base_dir.clone(),
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing ready; the loop stops.
    NoTask,
    /// Another worker won the claim.
    ClaimFailed { task_id: String },
    ProvisionFailed { task_id: String, note: String },
    ContextFailed { task_id: String, note: String },
    SpawnFailed { task_id: String, note: String },
    Reconciled {
        task_id: String,
        outcome: TaskOutcome,
        workspace_kept: bool,
    },
}

impl Iteration {
    pub fn should_continue(&self) -> bool {
        !matches!(self, Iteration::NoTask)
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Iteration::NoTask => None,
            Iteration::ClaimFailed { task_id }
            | Iteration::ProvisionFailed { task_id, .. }
            | Iteration::ContextFailed { task_id, .. }
            | Iteration::SpawnFailed { task_id, .. }
            | Iteration::Reconciled { task_id, .. } => Some(task_id),
        }
    }
}

/// One worker's loop, wired to its collaborators.
pub struct RalphLoop<R, C> {
    settings: LoopSettings,
    tracker: Tracker<R>,
    sessions: Tmux<R>,
    workspaces: WorkspaceManager<R>,
    registry: Registry,
    clock: C,
    plan_path: PathBuf,
    merge_lock_path: PathBuf,
}

impl<R: CommandRunner + Clone, C: Clock> RalphLoop<R, C> {
    pub fn new(runner: R, clock: C, paths: &HivePaths, settings: LoopSettings) -> Self {
        Self {
            tracker: Tracker::new(runner.clone(), settings.tracker_command.clone()),
            sessions: Tmux::new(runner.clone())
                .with_activity_min_lines(settings.activity_min_lines),
            workspaces: WorkspaceManager::new(runner, &paths.root, &settings.workspaces_base_dir),
            registry: paths.registry(),
            clock,
            plan_path: paths.plan_path.clone(),
            merge_lock_path: paths.merge_lock_path.clone(),
            settings,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run iterations until no task is ready. Returns the number of iterations
    /// that found a task.
    pub fn run<F: FnMut(&Iteration)>(&self, mut on_iteration: F) -> usize {
        let span = info_span!("worker", id = %self.settings.worker_id);
        let _enter = span.enter();

        let stale = self.workspaces.cleanup_stale(true);
        if !stale.is_empty() {
            info!(count = stale.len(), "cleaned stale workspaces");
        }
        info!("worker started");

        let mut processed = 0usize;
        loop {
            let iteration = self.run_iteration();
            on_iteration(&iteration);
            if !iteration.should_continue() {
                break;
            }
            processed += 1;
        }
        info!(processed, "worker finished");
        processed
    }

    /// Process at most one task.
    pub fn run_iteration(&self) -> Iteration {
        let Some(task) = self.tracker.next_ready_task() else {
            info!("no tasks remaining");
            return Iteration::NoTask;
        };
        info!(task = %task.id, title = %task.title, "found ready task");

        if !self.tracker.claim(&task.id, &self.settings.worker_id) {
            info!(task = %task.id, "claim lost, retrying shortly");
            self.clock.sleep(self.settings.claim_retry_delay);
            return Iteration::ClaimFailed { task_id: task.id };
        }

        let iteration = self.run_claimed(&task.id);
        self.unregister();
        iteration
    }

    #[instrument(skip(self), fields(worker = %self.settings.worker_id))]
    fn run_claimed(&self, task_id: &str) -> Iteration {
        let worker_id = &self.settings.worker_id;

        let workspace = match self.workspaces.create(
            worker_id,
            task_id,
            &self.settings.default_branch,
            true,
        ) {
            Ok(path) => path,
            Err(err) => {
                let note = format!("Worktree creation failed: {err:#}");
                self.fail(task_id, &note);
                return Iteration::ProvisionFailed {
                    task_id: task_id.to_string(),
                    note,
                };
            }
        };

        if let Err(err) = self.write_context(task_id, &workspace) {
            let note = format!("Context generation failed: {err:#}");
            self.fail(task_id, &note);
            self.destroy_workspace(task_id);
            return Iteration::ContextFailed {
                task_id: task_id.to_string(),
                note,
            };
        }

        let session = session_name(worker_id, task_id);
        if let Err(err) = self
            .sessions
            .start(&session, &workspace, &self.settings.agent_command)
        {
            warn!(err = %format!("{err:#}"), "agent session did not start cleanly");
        }
        self.register(task_id, &session, &workspace);

        info!(
            grace_secs = self.settings.spawn_grace.as_secs(),
            "waiting for agent to start"
        );
        self.clock.sleep(self.settings.spawn_grace);
        let alive = spawn_is_alive(
            self.tracker.status(task_id),
            || self.sessions.has_activity(&session),
            || self.sessions.exists(&session),
        );
        if !alive {
            let note = format!(
                "agent_spawn_failed: no activity within {}s",
                self.settings.spawn_grace.as_secs()
            );
            self.fail(task_id, &note);
            self.sessions.kill(&session);
            self.destroy_workspace(task_id);
            return Iteration::SpawnFailed {
                task_id: task_id.to_string(),
                note,
            };
        }

        let outcome = self.supervise(task_id, &session);
        self.sessions.kill(&session);
        let workspace_kept = self.reconcile(task_id, outcome, &workspace);
        Iteration::Reconciled {
            task_id: task_id.to_string(),
            outcome,
            workspace_kept,
        }
    }

    /// Poll until the task reaches a terminal outcome.
    fn supervise(&self, task_id: &str, session: &str) -> TaskOutcome {
        let started = self.clock.now();
        let timeout = self.settings.task_timeout;
        info!(timeout_secs = timeout.as_secs(), "supervising agent");

        loop {
            if self.clock.now().duration_since(started) >= timeout {
                self.fail(task_id, &format!("Timeout after {}s", timeout.as_secs()));
                return TaskOutcome::Timeout;
            }

            if !self.sessions.exists(session) {
                let status = self.tracker.status(task_id);
                if status == TaskStatus::InProgress {
                    self.fail(task_id, "Session crashed");
                    return TaskOutcome::Crashed;
                }
                let outcome = TaskOutcome::from_final_status(status);
                info!(%status, %outcome, "session ended");
                return outcome;
            }

            if let Err(err) = self.registry.touch(&self.settings.worker_id) {
                warn!(err = %format!("{err:#}"), "heartbeat update failed");
            }

            let status = self.tracker.status(task_id);
            if let Some(outcome) = TaskOutcome::from_poll_status(status) {
                info!(%outcome, "task reached terminal status");
                return outcome;
            }
            self.clock.sleep(self.settings.poll_interval);
        }
    }

    /// Apply the workspace disposition for `outcome`. Returns true if the workspace was kept.
    fn reconcile(&self, task_id: &str, outcome: TaskOutcome, workspace: &Path) -> bool {
        match disposition(outcome) {
            Disposition::MergeThenRemove => {
                let branch = branch_name(task_id);
                match self.merge(&branch) {
                    Ok(MergeResult::Merged) => {
                        info!(branch = %branch, "task merged");
                        self.destroy_workspace(task_id);
                        false
                    }
                    Ok(MergeResult::CheckoutFailed(detail) | MergeResult::Conflict(detail)) => {
                        warn!(branch = %branch, detail = %detail, "merge failed");
                        self.block_for_merge(task_id, workspace);
                        true
                    }
                    Err(err) => {
                        warn!(branch = %branch, err = %format!("{err:#}"), "merge could not run");
                        self.block_for_merge(task_id, workspace);
                        true
                    }
                }
            }
            Disposition::Keep => {
                info!(workspace = %workspace.display(), "task blocked, workspace preserved");
                true
            }
            Disposition::Remove => {
                if let TaskOutcome::Unexpected(status) = outcome {
                    warn!(%status, "session ended with non-terminal status");
                } else {
                    info!(%outcome, "discarding workspace");
                }
                self.destroy_workspace(task_id);
                false
            }
        }
    }

    /// Merge under the cross-worker merge lock.
    fn merge(&self, branch: &str) -> Result<MergeResult> {
        let _lock = FileLock::exclusive(&self.merge_lock_path)?;
        self.workspaces
            .merge_branch(&self.settings.default_branch, branch)
    }

    fn block_for_merge(&self, task_id: &str, workspace: &Path) {
        let note = format!(
            "Merge conflict, needs human resolution. Worktree: {}",
            workspace.display()
        );
        self.tracker.set_status(task_id, TaskStatus::Blocked, &note);
    }

    fn write_context(&self, task_id: &str, workspace: &Path) -> Result<PathBuf> {
        let detail = self.tracker.show(task_id)?;
        let plan = plan_for_context(&self.plan_path);
        let settings = ContextSettings {
            tracker_command: self.settings.tracker_command.clone(),
            default_branch: self.settings.default_branch.clone(),
            file_name: self.settings.context_file.clone(),
        };
        write_agent_context(workspace, &detail, plan.as_deref(), &settings)
    }

    fn fail(&self, task_id: &str, note: &str) {
        error!(task = task_id, note, "task failed");
        self.tracker.set_status(task_id, TaskStatus::Failed, note);
    }

    fn destroy_workspace(&self, task_id: &str) {
        if let Err(err) = self
            .workspaces
            .remove(&self.settings.worker_id, task_id, true)
        {
            warn!(err = %format!("{err:#}"), "workspace removal failed");
        }
    }

    fn register(&self, task_id: &str, session: &str, workspace: &Path) {
        let now = Utc::now();
        let record = WorkerRecord {
            id: self.settings.worker_id.clone(),
            pid: std::process::id(),
            tmux_session: session.to_string(),
            worktree: workspace.to_path_buf(),
            current_task: task_id.to_string(),
            started_at: now,
            last_activity: now,
        };
        if let Err(err) = self.registry.register(record) {
            warn!(err = %format!("{err:#}"), "worker registration failed");
        }
    }

    fn unregister(&self) {
        if let Err(err) = self.registry.unregister(&self.settings.worker_id) {
            warn!(err = %format!("{err:#}"), "worker unregistration failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence_over_config() {
        let cfg = HiveConfig::default();
        let overrides = WorkOverrides {
            poll_interval: Some(1),
            agent_command: Some("fake-agent".to_string()),
            ..WorkOverrides::default()
        };
        let settings = LoopSettings::from_config("worker-2", &cfg, "trunk", &overrides);
        assert_eq!(settings.worker_id, "worker-2");
        assert_eq!(settings.default_branch, "trunk");
        assert_eq!(settings.agent_command, "fake-agent");
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.task_timeout, Duration::from_secs(3600));
        assert_eq!(settings.spawn_grace, Duration::from_secs(30));
        assert_eq!(settings.claim_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn only_an_empty_queue_stops_the_loop() {
        assert!(!Iteration::NoTask.should_continue());
        let failed = Iteration::SpawnFailed {
            task_id: "hive-a".to_string(),
            note: "agent_spawn_failed".to_string(),
        };
        assert!(failed.should_continue());
        assert_eq!(failed.task_id(), Some("hive-a"));
        assert!(
            Iteration::ClaimFailed {
                task_id: "hive-a".to_string()
            }
            .should_continue()
        );
    }
}
