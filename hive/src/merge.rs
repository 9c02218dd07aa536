//! Operator-driven resolution of preserved workspaces (`hive merge`) and
//! branch synchronization with the remote (`hive sync`).
//!
//! The loop never resolves a failed merge itself: it blocks the task and
//! keeps the workspace. These commands let a human finish the job.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::naming::{branch_name, split_workspace_name, task_from_branch};
use crate::core::types::WorkspaceInfo;
use crate::io::git::Git;
use crate::io::lock::FileLock;
use crate::io::process::{CommandOutput, CommandRunner};
use crate::io::workspace::WorkspaceManager;

/// A preserved workspace resolved from an operator-supplied identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedWorkspace {
    pub path: PathBuf,
    pub branch: String,
    pub task_id: String,
}

impl LocatedWorkspace {
    /// Task identity from the tracked branch, falling back to the directory
    /// name for worktrees on a detached HEAD.
    fn from_info(ws: WorkspaceInfo) -> Option<Self> {
        if let Some(task_id) = ws.branch.as_deref().and_then(task_from_branch) {
            let task_id = task_id.to_string();
            return Some(Self {
                branch: branch_name(&task_id),
                task_id,
                path: ws.path,
            });
        }
        Self::from_dir(ws.path)
    }

    fn from_dir(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (_, task_id) = split_workspace_name(name)?;
        let task_id = task_id.to_string();
        Some(Self {
            branch: branch_name(&task_id),
            task_id,
            path,
        })
    }
}

/// Find a workspace by directory path, task id or `<worker>-<task>` name, in that order.
pub fn locate_workspace<R: CommandRunner + Clone>(
    manager: &WorkspaceManager<R>,
    identifier: &str,
) -> Result<Option<LocatedWorkspace>> {
    let managed: Vec<LocatedWorkspace> = manager
        .list_managed()?
        .into_iter()
        .filter_map(LocatedWorkspace::from_info)
        .collect();

    let as_path = Path::new(identifier);
    if as_path.is_dir() {
        let resolved = fs::canonicalize(as_path).unwrap_or_else(|_| as_path.to_path_buf());
        if let Some(found) = managed.iter().find(|ws| ws.path == resolved) {
            return Ok(Some(found.clone()));
        }
    }
    if let Some(found) = managed.iter().find(|ws| ws.task_id == identifier) {
        return Ok(Some(found.clone()));
    }

    let by_name = manager.workspaces_dir().join(identifier);
    if let Some(found) = managed.iter().find(|ws| ws.path == by_name) {
        return Ok(Some(found.clone()));
    }
    // Directory left behind without git tracking.
    if by_name.is_dir() {
        return Ok(LocatedWorkspace::from_dir(by_name));
    }
    Ok(None)
}

/// Uncommitted state of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInspection {
    pub conflicted: Vec<String>,
    pub other_changes: usize,
    pub branch: Option<String>,
}

impl WorkspaceInspection {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.has_conflicts() || self.other_changes > 0
    }
}

pub fn inspect_workspace<R: CommandRunner>(git: &Git<R>) -> Result<WorkspaceInspection> {
    let mut inspection = WorkspaceInspection {
        branch: git.current_branch().ok().filter(|b| !b.is_empty()),
        ..WorkspaceInspection::default()
    };
    for entry in git.status_porcelain()? {
        if entry.is_conflict() {
            inspection.conflicted.push(entry.path);
        } else {
            inspection.other_changes += 1;
        }
    }
    Ok(inspection)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssistOptions {
    /// Skip the merge and only remove the workspace and branch.
    pub cleanup_only: bool,
    /// Clean up even with uncommitted changes.
    pub force: bool,
}

/// What `hive merge` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistOutcome {
    CleanedUp,
    /// Cleanup refused: the workspace has uncommitted changes.
    DirtyRefused,
    /// Conflicts remain inside the workspace.
    NeedsResolution { conflicted: Vec<String> },
    /// Work is present but not committed.
    Uncommitted,
    CheckoutFailed(String),
    /// The merge into the default branch failed and was left for the operator.
    MergeFailed(String),
    Merged { workspace_removed: bool },
}

impl AssistOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            AssistOutcome::CleanedUp
            | AssistOutcome::NeedsResolution { .. }
            | AssistOutcome::Uncommitted
            | AssistOutcome::Merged { .. } => crate::exit_codes::OK,
            AssistOutcome::DirtyRefused
            | AssistOutcome::CheckoutFailed(_)
            | AssistOutcome::MergeFailed(_) => crate::exit_codes::INVALID,
        }
    }
}

/// Drives `hive merge` against the main checkout.
pub struct MergeAssist<'a, R> {
    manager: &'a WorkspaceManager<R>,
    default_branch: &'a str,
    merge_lock_path: &'a Path,
}

impl<'a, R: CommandRunner + Clone> MergeAssist<'a, R> {
    pub fn new(
        manager: &'a WorkspaceManager<R>,
        default_branch: &'a str,
        merge_lock_path: &'a Path,
    ) -> Self {
        Self {
            manager,
            default_branch,
            merge_lock_path,
        }
    }

    pub fn run(
        &self,
        workspace: &LocatedWorkspace,
        inspection: &WorkspaceInspection,
        options: AssistOptions,
    ) -> Result<AssistOutcome> {
        let git = self.manager.git();

        if options.cleanup_only {
            if inspection.is_dirty() && !options.force {
                return Ok(AssistOutcome::DirtyRefused);
            }
            let out = git.worktree_remove(&workspace.path, options.force)?;
            if !out.success() {
                return Err(anyhow!(
                    "failed to remove worktree {}: {}",
                    workspace.path.display(),
                    out.stderr.trim()
                ));
            }
            git.delete_branch_quietly(&workspace.branch, true);
            info!(task = %workspace.task_id, "workspace cleaned up");
            return Ok(AssistOutcome::CleanedUp);
        }

        if inspection.has_conflicts() {
            return Ok(AssistOutcome::NeedsResolution {
                conflicted: inspection.conflicted.clone(),
            });
        }
        if inspection.is_dirty() {
            return Ok(AssistOutcome::Uncommitted);
        }

        let _lock = FileLock::exclusive(self.merge_lock_path)?;
        if let Err(err) = git.checkout(self.default_branch) {
            return Ok(AssistOutcome::CheckoutFailed(format!("{err:#}")));
        }
        match git.run(&["pull"]) {
            Ok(out) if !out.success() => debug!(stderr = %out.stderr.trim(), "pull skipped"),
            Err(err) => debug!(err = %format!("{err:#}"), "pull could not run"),
            Ok(_) => {}
        }
        let merged = git.merge_no_edit(&workspace.branch)?;
        if !merged.success() {
            let detail = [merged.stdout.trim(), merged.stderr.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            warn!(branch = %workspace.branch, "merge failed");
            return Ok(AssistOutcome::MergeFailed(detail));
        }
        info!(branch = %workspace.branch, "branch merged");

        let removed = git.worktree_remove(&workspace.path, true)?;
        let workspace_removed = removed.success();
        if !workspace_removed {
            warn!(stderr = %removed.stderr.trim(), "worktree removal failed");
        }
        git.delete_branch_quietly(&workspace.branch, false);
        Ok(AssistOutcome::Merged { workspace_removed })
    }
}

/// A task branch checked out in a tracked workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBranch {
    pub branch: String,
    pub workspace: PathBuf,
}

/// Every non-main worktree on a `task-*` branch.
pub fn task_branches<R: CommandRunner + Clone>(
    manager: &WorkspaceManager<R>,
) -> Result<Vec<TaskBranch>> {
    Ok(manager
        .list()?
        .into_iter()
        .filter(|ws| ws.path != manager.repo_root())
        .filter_map(|ws| {
            let branch = ws.branch?;
            task_from_branch(&branch)?;
            Some(TaskBranch {
                branch,
                workspace: ws.path,
            })
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub push: bool,
    pub pull: bool,
    pub dry_run: bool,
}

impl SyncOptions {
    /// Neither direction requested means both.
    pub fn directions(&self) -> (bool, bool) {
        if !self.push && !self.pull {
            (true, true)
        } else {
            (self.push, self.pull)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Push,
    Pull,
}

/// Result of one branch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub branch: String,
    pub action: SyncAction,
    /// `None` in a dry run.
    pub ok: Option<bool>,
    pub detail: String,
}

/// Push and/or fast-forward every task branch. Per-branch failures are recorded, never fatal.
pub fn sync_branches<R: CommandRunner + Clone>(
    manager: &WorkspaceManager<R>,
    branches: &[TaskBranch],
    options: SyncOptions,
) -> Vec<SyncResult> {
    let (push, pull) = options.directions();
    let git = manager.git();
    let mut results = Vec::new();

    let mut record = |tb: &TaskBranch, action: SyncAction, ran: Option<(bool, String)>| {
        let (ok, detail) = match ran {
            Some((ok, detail)) => (Some(ok), detail),
            None => (None, String::new()),
        };
        results.push(SyncResult {
            branch: tb.branch.clone(),
            action,
            ok,
            detail,
        });
    };

    if push {
        for tb in branches {
            let ran = (!options.dry_run)
                .then(|| command_result(git.run(&["push", "origin", &tb.branch])));
            record(tb, SyncAction::Push, ran);
        }
    }
    if pull {
        for tb in branches {
            let ran = (!options.dry_run).then(|| {
                if let Err(err) = git.run(&["fetch", "origin", &tb.branch]) {
                    debug!(err = %format!("{err:#}"), "fetch could not run");
                }
                // The branch is checked out in its workspace, so fast-forward there.
                let remote = format!("origin/{}", tb.branch);
                command_result(git.at(&tb.workspace).run(&["merge", &remote, "--ff-only"]))
            });
            record(tb, SyncAction::Pull, ran);
        }
    }
    results
}

fn command_result(result: Result<CommandOutput>) -> (bool, String) {
    match result {
        Ok(out) if out.success() => (true, String::new()),
        Ok(out) => (false, out.stderr.trim().to_string()),
        Err(err) => (false, format!("{err:#}")),
    }
}

/// Directory listing shown when an identifier matches nothing.
pub fn available_workspaces<R: CommandRunner + Clone>(
    manager: &WorkspaceManager<R>,
) -> Vec<PathBuf> {
    manager
        .list()
        .context("list worktrees")
        .map(|list| {
            list.into_iter()
                .map(|ws| ws.path)
                .filter(|p| p != manager.repo_root())
                .collect()
        })
        .unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "could not list worktrees");
            Vec::new()
        })
}
