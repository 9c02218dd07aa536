//! Deterministic names derived from (worker id, task id).

use std::sync::LazyLock;

use regex::Regex;

/// Prefix of every task branch.
pub const BRANCH_PREFIX: &str = "task-";

static WORKSPACE_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(worker-[A-Za-z0-9_]+)-(.+)$").ok());

/// Directory name of the workspace for a (worker, task) pair.
pub fn workspace_dir_name(worker_id: &str, task_id: &str) -> String {
    format!("{worker_id}-{task_id}")
}

/// Branch name owned by a task.
pub fn branch_name(task_id: &str) -> String {
    format!("{BRANCH_PREFIX}{task_id}")
}

/// Multiplexer session name for a (worker, task) pair.
pub fn session_name(worker_id: &str, task_id: &str) -> String {
    format!("hive-{worker_id}-{task_id}")
}

/// True for branches created by [`branch_name`].
pub fn is_task_branch(branch: &str) -> bool {
    branch.starts_with(BRANCH_PREFIX)
}

/// Task id of a task branch.
pub fn task_from_branch(branch: &str) -> Option<&str> {
    branch.strip_prefix(BRANCH_PREFIX).filter(|t| !t.is_empty())
}

/// Split a workspace directory name into (worker id, task id).
///
/// Only names of workers spawned as `worker-<token>` can be split; worker
/// ids are otherwise free-form and the split would be ambiguous.
pub fn split_workspace_name(name: &str) -> Option<(&str, &str)> {
    let re = WORKSPACE_NAME.as_ref()?;
    let caps = re.captures(name)?;
    let worker = caps.get(1)?.as_str();
    let task = caps.get(2)?.as_str();
    Some((worker, task))
}
