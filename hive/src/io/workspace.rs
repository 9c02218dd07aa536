//! Git worktree management for (worker, task) workspaces.
//!
//! Each claimed task gets its own worktree under the workspaces directory
//! (`<worker>-<task>`) on its own branch (`task-<task>`). The manager also
//! reconciles tracking left behind by crashed workers and merges finished
//! branches back into the default branch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::naming::{branch_name, workspace_dir_name};
use crate::core::types::WorkspaceInfo;
use crate::io::git::Git;
use crate::io::process::CommandRunner;

/// Workspace failures callers branch on.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },
    #[error("workspace has uncommitted changes: {} ({detail})", .path.display())]
    DirtyWorkspace { path: PathBuf, detail: String },
    /// Git refused the removal for another reason (locked, not a worktree).
    #[error("could not remove workspace {}: {detail}", .path.display())]
    RemoveFailed { path: PathBuf, detail: String },
}

const DIRTY_MARKER: &str = "modified or untracked files";

/// Result of merging a task branch into the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Merged,
    /// The default branch could not be checked out; nothing was merged.
    CheckoutFailed(String),
    /// The merge failed and was aborted.
    Conflict(String),
}

impl MergeResult {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeResult::Merged)
    }
}

/// Creates, removes and lists task worktrees.
#[derive(Debug, Clone)]
pub struct WorkspaceManager<R> {
    git: Git<R>,
    repo_root: PathBuf,
    workspaces_dir: PathBuf,
}

impl<R: CommandRunner + Clone> WorkspaceManager<R> {
    /// `base_dir` is relative to the repository root unless absolute.
    pub fn new(runner: R, repo_root: impl Into<PathBuf>, base_dir: impl AsRef<Path>) -> Self {
        let repo_root = repo_root.into();
        let repo_root = fs::canonicalize(&repo_root).unwrap_or(repo_root);
        let workspaces_dir = repo_root.join(base_dir);
        Self {
            git: Git::new(runner, repo_root.clone()),
            repo_root,
            workspaces_dir,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    /// Git handle rooted at the main checkout.
    pub fn git(&self) -> &Git<R> {
        &self.git
    }

    pub fn workspace_path(&self, worker_id: &str, task_id: &str) -> PathBuf {
        self.workspaces_dir
            .join(workspace_dir_name(worker_id, task_id))
    }

    pub fn exists(&self, worker_id: &str, task_id: &str) -> bool {
        self.workspace_path(worker_id, task_id).exists()
    }

    /// Create the workspace for (worker, task) on a new branch from `base_branch`.
    ///
    /// Fails with [`WorkspaceError::AlreadyExists`] if the directory exists
    /// and `force` is false; with `force` the old workspace is destroyed first.
    /// A `task-<task>` branch with no workspace of this key is never deleted:
    /// it may carry unmerged work, so `worktree add` fails instead.
    #[instrument(skip(self))]
    pub fn create(
        &self,
        worker_id: &str,
        task_id: &str,
        base_branch: &str,
        force: bool,
    ) -> Result<PathBuf> {
        let path = self.workspace_path(worker_id, task_id);
        let branch = branch_name(task_id);

        if path.exists() {
            if !force {
                return Err(WorkspaceError::AlreadyExists { path }.into());
            }
            info!(path = %path.display(), "replacing existing workspace");
            self.remove(worker_id, task_id, true)?;
        }
        // Tracking for a directory deleted out-of-band blocks `worktree add`.
        if let Err(err) = self.git.worktree_prune() {
            warn!(err = %format!("{err:#}"), "worktree prune failed");
        }

        fs::create_dir_all(&self.workspaces_dir)
            .with_context(|| format!("create directory {}", self.workspaces_dir.display()))?;
        self.git
            .worktree_add(&path, &branch, base_branch)
            .with_context(|| format!("create workspace {}", path.display()))?;
        info!(path = %path.display(), branch = %branch, "workspace created");
        Ok(path)
    }

    /// Remove the workspace for (worker, task) and delete its branch.
    #[instrument(skip(self))]
    pub fn remove(&self, worker_id: &str, task_id: &str, force: bool) -> Result<()> {
        let path = self.workspace_path(worker_id, task_id);
        let branch = branch_name(task_id);

        if !path.exists() {
            debug!(path = %path.display(), "workspace directory already gone, detaching");
            if let Ok(out) = self.git.worktree_remove(&path, true)
                && !out.success()
            {
                debug!(stderr = %out.stderr.trim(), "nothing tracked at path");
            }
            if let Err(err) = self.git.worktree_prune() {
                warn!(err = %format!("{err:#}"), "worktree prune failed");
            }
            self.git.delete_branch_quietly(&branch, true);
            return Ok(());
        }

        let out = self.git.worktree_remove(&path, force)?;
        if !out.success() {
            if !force {
                let detail = out.stderr.trim().to_string();
                let err = if detail.contains(DIRTY_MARKER) {
                    WorkspaceError::DirtyWorkspace { path, detail }
                } else {
                    WorkspaceError::RemoveFailed { path, detail }
                };
                return Err(err.into());
            }
            warn!(
                path = %path.display(),
                stderr = %out.stderr.trim(),
                "git refused removal, deleting directory"
            );
            fs::remove_dir_all(&path)
                .with_context(|| format!("delete workspace directory {}", path.display()))?;
            self.git.worktree_prune()?;
        }

        self.git.delete_branch_quietly(&branch, true);
        info!(path = %path.display(), "workspace removed");
        Ok(())
    }

    /// All worktrees git tracks for this repository, including the main checkout.
    pub fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        self.git.worktree_list()
    }

    /// Worktrees under the workspaces directory.
    pub fn list_managed(&self) -> Result<Vec<WorkspaceInfo>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|ws| self.is_managed(&ws.path))
            .collect())
    }

    fn is_managed(&self, path: &Path) -> bool {
        path != self.repo_root && path.starts_with(&self.workspaces_dir)
    }

    /// Drop tracking for managed workspaces whose directory no longer exists.
    ///
    /// Never fails: per-entry errors are logged, and a final prune always runs.
    #[instrument(skip(self))]
    pub fn cleanup_stale(&self, force: bool) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        match self.list() {
            Ok(entries) => {
                for ws in entries {
                    if !self.is_managed(&ws.path) || ws.path.exists() {
                        continue;
                    }
                    match self.git.worktree_remove(&ws.path, force) {
                        Ok(out) if out.success() => {}
                        Ok(out) => {
                            debug!(
                                path = %ws.path.display(),
                                stderr = %out.stderr.trim(),
                                "remove failed, pruning"
                            );
                            if let Err(err) = self.git.worktree_prune() {
                                warn!(err = %format!("{err:#}"), "worktree prune failed");
                            }
                        }
                        Err(err) => warn!(
                            path = %ws.path.display(),
                            err = %format!("{err:#}"),
                            "remove could not run"
                        ),
                    }
                    info!(path = %ws.path.display(), "stale workspace cleaned");
                    removed.push(ws.path);
                }
            }
            Err(err) => warn!(err = %format!("{err:#}"), "could not list worktrees"),
        }
        if let Err(err) = self.git.worktree_prune() {
            warn!(err = %format!("{err:#}"), "final worktree prune failed");
        }
        removed
    }

    /// Merge `branch` into `default_branch` in the main checkout.
    ///
    /// Never resolves conflicts: a failed merge is aborted and reported.
    #[instrument(skip(self))]
    pub fn merge_branch(&self, default_branch: &str, branch: &str) -> Result<MergeResult> {
        if let Err(err) = self.git.checkout(default_branch) {
            warn!(err = %format!("{err:#}"), "checkout of default branch failed");
            return Ok(MergeResult::CheckoutFailed(format!("{err:#}")));
        }
        let out = self.git.merge_no_edit(branch)?;
        if out.success() {
            info!("branch merged");
            return Ok(MergeResult::Merged);
        }
        let detail = if out.stdout.trim().is_empty() {
            out.stderr.trim().to_string()
        } else {
            out.stdout.trim().to_string()
        };
        warn!(detail = %detail, "merge failed, aborting");
        match self.git.merge_abort() {
            Ok(abort) if !abort.success() => {
                debug!(stderr = %abort.stderr.trim(), "merge --abort reported failure");
            }
            Err(err) => warn!(err = %format!("{err:#}"), "merge --abort could not run"),
            Ok(_) => {}
        }
        Ok(MergeResult::Conflict(detail))
    }
}
