//! Typed records exchanged with the tracker, git and the registry.
//!
//! Everything the adapters read from JSON or line-oriented tool output is
//! converted into these types at the boundary so the loop never touches raw
//! maps.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Task status as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    TooBig,
    Failed,
    Closed,
    Done,
    /// Unrecognized status, or the tracker could not be reached.
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::TooBig => "too_big",
            TaskStatus::Failed => "failed",
            TaskStatus::Closed => "closed",
            TaskStatus::Done => "done",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Parse a raw status string; anything unrecognized maps to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "open" => TaskStatus::Open,
            "in_progress" => TaskStatus::InProgress,
            "blocked" => TaskStatus::Blocked,
            "too_big" => TaskStatus::TooBig,
            "failed" => TaskStatus::Failed,
            "closed" => TaskStatus::Closed,
            "done" => TaskStatus::Done,
            _ => TaskStatus::Unknown,
        }
    }

    /// `done` and `closed` both mean the agent finished the work.
    pub fn is_complete(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Closed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_status() -> TaskStatus {
    TaskStatus::Open
}

fn no_dependencies() -> Option<u32> {
    Some(0)
}

/// Entry of the tracker's ready list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyTask {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// A missing count means none; an explicit `null` means unknown.
    #[serde(default = "no_dependencies")]
    pub dependency_count: Option<u32>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

/// A dependency edge with the dependency's own status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

/// Full task record from the tracker's show command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", alias = "issue_type", default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Entry of the tracker's full task list (used for progress reporting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

/// The tracker's show command returns either one record or an array of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::Many(items) => items.into_iter().next(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One active worker in `.hive/workers.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub pid: u32,
    pub tmux_session: String,
    pub worktree: PathBuf,
    pub current_task: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Persisted registry document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDoc {
    #[serde(default)]
    pub workers: Vec<WorkerRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A worktree tracked by git, as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceInfo {
    pub path: PathBuf,
    /// Short branch name (`refs/heads/` stripped).
    pub branch: Option<String>,
    pub head: Option<String>,
    pub bare: bool,
    pub detached: bool,
}

/// Terminal outcome of one supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    TooBig,
    Blocked,
    Failed,
    Timeout,
    Crashed,
    /// The session ended while the tracker reported a non-terminal status.
    Unexpected(TaskStatus),
}

impl TaskOutcome {
    /// Classify the tracker status observed after the session went away.
    pub fn from_final_status(status: TaskStatus) -> Self {
        match status {
            s if s.is_complete() => TaskOutcome::Done,
            TaskStatus::TooBig => TaskOutcome::TooBig,
            TaskStatus::Blocked => TaskOutcome::Blocked,
            TaskStatus::Failed => TaskOutcome::Failed,
            other => TaskOutcome::Unexpected(other),
        }
    }

    /// Classify a status observed while the session is still alive.
    ///
    /// Returns `None` when supervision should keep polling.
    pub fn from_poll_status(status: TaskStatus) -> Option<Self> {
        match status {
            s if s.is_complete() => Some(TaskOutcome::Done),
            TaskStatus::TooBig => Some(TaskOutcome::TooBig),
            TaskStatus::Blocked => Some(TaskOutcome::Blocked),
            TaskStatus::Failed => Some(TaskOutcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Done => f.write_str("done"),
            TaskOutcome::TooBig => f.write_str("too_big"),
            TaskOutcome::Blocked => f.write_str("blocked"),
            TaskOutcome::Failed => f.write_str("failed"),
            TaskOutcome::Timeout => f.write_str("timeout"),
            TaskOutcome::Crashed => f.write_str("crashed"),
            TaskOutcome::Unexpected(status) => write!(f, "unexpected ({status})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_strings_deserialize_to_unknown() {
        let dep: Dependency =
            serde_json::from_str(r#"{"id":"a","status":"tombstone"}"#).expect("parse");
        assert_eq!(dep.status, TaskStatus::Unknown);
    }

    #[test]
    fn detail_accepts_issue_type_and_null_dependencies() {
        let detail: TaskDetail = serde_json::from_str(
            r#"{"id":"hive-1","title":"T","issue_type":"bug","status":"in_progress","dependencies":null}"#,
        )
        .expect("parse");
        assert_eq!(detail.task_type.as_deref(), Some("bug"));
        assert_eq!(detail.status, TaskStatus::InProgress);
        assert!(detail.dependencies.is_empty());
    }

    #[test]
    fn show_output_may_be_object_or_array() {
        let many: OneOrMany<TaskSummary> =
            serde_json::from_str(r#"[{"id":"a","status":"open"}]"#).expect("array");
        let one: OneOrMany<TaskSummary> =
            serde_json::from_str(r#"{"id":"b","status":"closed"}"#).expect("object");
        assert_eq!(many.into_first().map(|t| t.id), Some("a".to_string()));
        assert_eq!(one.into_first().map(|t| t.status), Some(TaskStatus::Closed));
    }

    #[test]
    fn done_and_closed_both_complete_supervision() {
        assert_eq!(
            TaskOutcome::from_poll_status(TaskStatus::Closed),
            Some(TaskOutcome::Done)
        );
        assert_eq!(
            TaskOutcome::from_poll_status(TaskStatus::Done),
            Some(TaskOutcome::Done)
        );
        assert_eq!(TaskOutcome::from_poll_status(TaskStatus::InProgress), None);
        assert_eq!(
            TaskOutcome::from_final_status(TaskStatus::Open),
            TaskOutcome::Unexpected(TaskStatus::Open)
        );
    }
}
