//! `hive status`: active workers and task progress.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::warn;

use crate::core::types::{TaskStatus, TaskSummary, WorkerRecord};
use crate::io::process::CommandRunner;
use crate::io::registry::Registry;
use crate::io::tracker::Tracker;

/// Task counts by status bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub open: usize,
    pub in_progress: usize,
    pub closed: usize,
    pub blocked: usize,
    pub too_big: usize,
    pub failed: usize,
}

impl TaskCounts {
    /// `done` counts as closed; statuses hive does not know count as open.
    pub fn tally(tasks: &[TaskSummary]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            let bucket = match task.status {
                TaskStatus::InProgress => &mut counts.in_progress,
                TaskStatus::Closed | TaskStatus::Done => &mut counts.closed,
                TaskStatus::Blocked => &mut counts.blocked,
                TaskStatus::TooBig => &mut counts.too_big,
                TaskStatus::Failed => &mut counts.failed,
                TaskStatus::Open | TaskStatus::Unknown => &mut counts.open,
            };
            *bucket += 1;
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.open + self.in_progress + self.closed + self.blocked + self.too_big + self.failed
    }

    /// Closed share in whole percent.
    pub fn percent_closed(&self) -> usize {
        match self.total() {
            0 => 0,
            total => self.closed * 100 / total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerRecord>,
    pub tasks: TaskCounts,
    pub total_tasks: usize,
}

/// Gather the registry and tracker view. A tracker failure yields zero tasks.
pub fn collect_status<R: CommandRunner>(
    registry: &Registry,
    tracker: &Tracker<R>,
) -> Result<StatusReport> {
    let workers = registry.list()?;
    let tasks = tracker.list_all().unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "could not list tasks");
        Vec::new()
    });
    let counts = TaskCounts::tally(&tasks);
    Ok(StatusReport {
        workers,
        total_tasks: counts.total(),
        tasks: counts,
    })
}

fn local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Human-readable status block.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Hive Status");
    let _ = writeln!(out, "===========");
    let _ = writeln!(out);

    if report.workers.is_empty() {
        let _ = writeln!(out, "Active workers: none");
    } else {
        let _ = writeln!(out, "Active workers: {}", report.workers.len());
        for worker in &report.workers {
            let _ = writeln!(out, "  {}", worker.id);
            let _ = writeln!(out, "    task:          {}", worker.current_task);
            let _ = writeln!(out, "    session:       {}", worker.tmux_session);
            let _ = writeln!(out, "    worktree:      {}", worker.worktree.display());
            let _ = writeln!(out, "    started:       {}", local(worker.started_at));
            let _ = writeln!(out, "    last activity: {}", local(worker.last_activity));
        }
    }
    let _ = writeln!(out);

    let t = &report.tasks;
    let _ = writeln!(out, "Tasks:");
    for (label, count) in [
        ("open", t.open),
        ("in_progress", t.in_progress),
        ("closed", t.closed),
        ("blocked", t.blocked),
        ("too_big", t.too_big),
        ("failed", t.failed),
    ] {
        let _ = writeln!(out, "  {label:<12} {count}");
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Progress: {}/{} ({}%)",
        t.closed,
        report.total_tasks,
        t.percent_closed()
    );
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::io::process::CommandOutput;
    use crate::test_support::ScriptedRunner;

    fn summary(id: &str, status: TaskStatus) -> TaskSummary {
        TaskSummary {
            id: id.to_string(),
            title: id.to_string(),
            status,
        }
    }

    #[test]
    fn done_and_unknown_statuses_fold_into_buckets() {
        let counts = TaskCounts::tally(&[
            summary("a", TaskStatus::Done),
            summary("b", TaskStatus::Closed),
            summary("c", TaskStatus::Unknown),
            summary("d", TaskStatus::TooBig),
        ]);
        assert_eq!(counts.closed, 2);
        assert_eq!(counts.open, 1);
        assert_eq!(counts.too_big, 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.percent_closed(), 50);
    }

    #[test]
    fn tracker_failure_means_zero_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        registry.reset().expect("reset");
        let runner = ScriptedRunner::new();
        runner.on(&["bd", "list"], CommandOutput::failed(1, "no database"));

        let report = collect_status(&registry, &Tracker::new(runner, "bd")).expect("status");
        assert_eq!(report.total_tasks, 0);
        assert!(render_status(&report).contains("Progress: 0/0 (0%)"));
        assert!(render_status(&report).contains("Active workers: none"));
    }

    #[test]
    fn report_counts_tracker_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        let runner = ScriptedRunner::new();
        runner.on_json(
            &["bd", "list", "--json"],
            json!([
                {"id": "a", "title": "A", "status": "closed"},
                {"id": "b", "title": "B", "status": "in_progress"},
                {"id": "c", "title": "C", "status": "open"}
            ]),
        );

        let report = collect_status(&registry, &Tracker::new(runner, "bd")).expect("status");
        assert_eq!(report.tasks.in_progress, 1);
        let text = render_status(&report);
        assert!(text.contains("Progress: 1/3 (33%)"));
        let value = serde_json::to_value(&report).expect("json");
        assert_eq!(value["total_tasks"], 3);
        assert_eq!(value["tasks"]["closed"], 1);
    }
}
