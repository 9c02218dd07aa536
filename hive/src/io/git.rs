//! Git adapter.
//!
//! A small, explicit wrapper around `git` invocations in one working
//! directory. Commands go through [`CommandRunner`] so tests can script git
//! responses.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::porcelain::{StatusEntry, parse_status, parse_worktree_list};
use crate::core::types::WorkspaceInfo;
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git<R> {
    runner: R,
    workdir: PathBuf,
}

impl<R: CommandRunner> Git<R> {
    pub fn new(runner: R, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Same runner, different working directory.
    pub fn at(&self, workdir: impl Into<PathBuf>) -> Self
    where
        R: Clone,
    {
        Self::new(self.runner.clone(), workdir)
    }

    /// Current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(anyhow!("detached HEAD"));
        }
        Ok(name)
    }

    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain"])?;
        parse_status(&out)
    }

    /// Default branch advertised by `origin`, if any.
    pub fn remote_default_branch(&self) -> Option<String> {
        let out = self
            .run(&["symbolic-ref", "refs/remotes/origin/HEAD"])
            .ok()
            .filter(CommandOutput::success)?;
        out.stdout
            .trim()
            .strip_prefix("refs/remotes/origin/")
            .filter(|b| !b.is_empty())
            .map(str::to_string)
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// `git worktree add <path> -b <branch> <base>`.
    #[instrument(skip_all, fields(path = %path.display(), branch, base))]
    pub fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path = path.to_string_lossy();
        self.run_checked(&["worktree", "add", &path, "-b", branch, base])?;
        Ok(())
    }

    /// `git worktree remove <path> [--force]`; the raw output is returned for the caller to judge.
    pub fn worktree_remove(&self, path: &Path, force: bool) -> Result<CommandOutput> {
        let path = path.to_string_lossy();
        let mut args = vec!["worktree", "remove", &*path];
        if force {
            args.push("--force");
        }
        self.run(&args)
    }

    pub fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    pub fn worktree_list(&self) -> Result<Vec<WorkspaceInfo>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    /// Delete a local branch; failures (e.g. branch missing) are logged and ignored.
    pub fn delete_branch_quietly(&self, branch: &str, force: bool) {
        let flag = if force { "-D" } else { "-d" };
        match self.run(&["branch", flag, branch]) {
            Ok(out) if out.success() => debug!(branch, "branch deleted"),
            Ok(out) => debug!(branch, stderr = %out.stderr.trim(), "branch not deleted"),
            Err(err) => warn!(branch, err = %err, "branch delete could not run"),
        }
    }

    /// `git merge <branch> --no-edit`; returns the raw output.
    pub fn merge_no_edit(&self, branch: &str) -> Result<CommandOutput> {
        self.run(&["merge", branch, "--no-edit"])
    }

    pub fn merge_abort(&self) -> Result<CommandOutput> {
        self.run(&["merge", "--abort"])
    }

    pub fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    pub fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            ));
        }
        Ok(output)
    }

    pub fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let request = CommandRequest::new("git", args.iter().copied()).current_dir(&self.workdir);
        self.runner
            .run(&request)
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
