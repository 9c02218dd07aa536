//! Adapter for the external task tracker (`bd`).
//!
//! The tracker is the system of record for tasks. Every query here is
//! best-effort: communication failures become `None`, `false` or
//! [`TaskStatus::Unknown`] so the loop can simply retry.

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::core::readiness::first_ready;
use crate::core::types::{OneOrMany, ReadyTask, TaskDetail, TaskStatus, TaskSummary};
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner};

/// Handle to the tracker command-line tool.
#[derive(Debug, Clone)]
pub struct Tracker<R> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> Tracker<R> {
    pub fn new(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// First ready task whose dependencies are all closed, in tracker order.
    ///
    /// "No work" and "tracker unreachable" both yield `None`.
    #[instrument(skip_all)]
    pub fn next_ready_task(&self) -> Option<ReadyTask> {
        let entries: Vec<serde_json::Value> =
            match self.query_json(&["list", "--ready", "--json"]) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "could not list ready tasks");
                    return None;
                }
            };
        let candidates: Vec<ReadyTask> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(task) => Some(task),
                Err(err) => {
                    debug!(err = %err, "skipping malformed ready entry");
                    None
                }
            })
            .collect();
        debug!(candidates = candidates.len(), "ready list fetched");
        first_ready(&candidates, |task| match self.show(&task.id) {
            Ok(detail) => Some(detail.dependencies),
            Err(err) => {
                debug!(task = %task.id, err = %format!("{err:#}"), "dependency lookup failed");
                None
            }
        })
        .cloned()
    }

    /// Atomically claim a task. Lost races and tracker errors both return false.
    #[instrument(skip(self))]
    pub fn claim(&self, task_id: &str, worker_id: &str) -> bool {
        match self.call(&["update", task_id, "--claim"]) {
            Ok(out) if out.success() => {
                info!("task claimed");
                true
            }
            Ok(out) => {
                debug!(stderr = %out.stderr.trim(), "claim rejected");
                false
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "claim could not run");
                false
            }
        }
    }

    /// Current status; `Unknown` when the tracker cannot be queried.
    pub fn status(&self, task_id: &str) -> TaskStatus {
        match self.show(task_id) {
            Ok(detail) => detail.status,
            Err(err) => {
                debug!(task = task_id, err = %format!("{err:#}"), "status unavailable");
                TaskStatus::Unknown
            }
        }
    }

    /// Set status and notes. Failures are logged, never returned.
    #[instrument(skip(self))]
    pub fn set_status(&self, task_id: &str, status: TaskStatus, notes: &str) {
        let result = self.call(&["update", task_id, "--status", status.as_str(), "--notes", notes]);
        match result {
            Ok(out) if out.success() => info!("tracker updated"),
            Ok(out) => warn!(stderr = %out.stderr.trim(), "tracker rejected status update"),
            Err(err) => warn!(err = %format!("{err:#}"), "tracker status update could not run"),
        }
    }

    /// Full record of one task.
    pub fn show(&self, task_id: &str) -> Result<TaskDetail> {
        let parsed: OneOrMany<TaskDetail> = self.query_json(&["show", task_id, "--json"])?;
        parsed
            .into_first()
            .ok_or_else(|| anyhow!("tracker returned no record for {task_id}"))
    }

    /// Every task the tracker knows about.
    pub fn list_all(&self) -> Result<Vec<TaskSummary>> {
        self.query_json(&["list", "--json"])
    }

    fn query_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let out = self.call(args)?;
        if !out.success() {
            return Err(anyhow!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                out.stderr.trim()
            ));
        }
        serde_json::from_str(&out.stdout)
            .with_context(|| format!("parse {} {} output", self.program, args.join(" ")))
    }

    fn call(&self, args: &[&str]) -> Result<CommandOutput> {
        let request = CommandRequest::new(self.program.clone(), args.iter().copied());
        self.runner.run(&request)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::ScriptedRunner;

    fn tracker(runner: &ScriptedRunner) -> Tracker<ScriptedRunner> {
        Tracker::new(runner.clone(), "bd")
    }

    #[test]
    fn zero_dependency_task_returned_without_detail_lookup() {
        let runner = ScriptedRunner::new();
        runner.on_json(
            &["bd", "list", "--ready"],
            json!([{"id": "hive-a", "title": "A", "dependency_count": 0, "status": "open"}]),
        );
        let task = tracker(&runner).next_ready_task().expect("task");
        assert_eq!(task.id, "hive-a");
        assert!(!runner.was_called(&["bd", "show"]));
    }

    #[test]
    fn task_with_open_dependency_is_skipped() {
        let runner = ScriptedRunner::new();
        runner.on_json(
            &["bd", "list", "--ready"],
            json!([
                {"id": "hive-a", "title": "A", "dependency_count": 1},
                {"id": "hive-b", "title": "B", "dependency_count": 0}
            ]),
        );
        runner.on_json(
            &["bd", "show", "hive-a"],
            json!([{"id": "hive-a", "title": "A", "status": "open",
                    "dependencies": [{"id": "hive-z", "status": "open"}]}]),
        );
        let task = tracker(&runner).next_ready_task().expect("task");
        assert_eq!(task.id, "hive-b");
        assert_eq!(runner.calls_matching(&["bd", "show"]), vec!["bd show hive-a --json"]);
    }

    #[test]
    fn closed_dependencies_release_the_task() {
        let runner = ScriptedRunner::new();
        runner.on_json(
            &["bd", "list", "--ready"],
            json!([{"id": "hive-a", "dependency_count": 1}]),
        );
        runner.on_json(
            &["bd", "show", "hive-a"],
            json!({"id": "hive-a", "dependencies": [{"id": "hive-z", "status": "closed"}]}),
        );
        assert_eq!(
            tracker(&runner).next_ready_task().map(|t| t.id),
            Some("hive-a".to_string())
        );
    }

    #[test]
    fn malformed_ready_entries_do_not_hide_the_rest() {
        let runner = ScriptedRunner::new();
        runner.on_json(
            &["bd", "list", "--ready"],
            json!([
                {"title": "no id", "dependency_count": 0},
                {"id": "hive-a", "title": "A", "dependency_count": null},
                {"id": "hive-b", "title": "B"}
            ]),
        );
        runner.on_json(
            &["bd", "show", "hive-a"],
            json!({"id": "hive-a", "dependencies": [{"id": "hive-z", "status": "open"}]}),
        );
        let task = tracker(&runner).next_ready_task().expect("task");
        assert_eq!(task.id, "hive-b");
        assert_eq!(runner.calls_matching(&["bd", "show"]), vec!["bd show hive-a --json"]);
    }

    #[test]
    fn unreachable_tracker_means_no_task() {
        let runner = ScriptedRunner::new();
        runner.on(&["bd", "list"], CommandOutput::failed(1, "database locked"));
        assert!(tracker(&runner).next_ready_task().is_none());

        let garbage = ScriptedRunner::new();
        garbage.on(&["bd", "list"], CommandOutput::ok("not json"));
        assert!(tracker(&garbage).next_ready_task().is_none());
    }

    #[test]
    fn claim_maps_exit_code_to_bool() {
        let runner = ScriptedRunner::new();
        runner
            .on(&["bd", "update", "hive-a", "--claim"], CommandOutput::ok(""))
            .on(&["bd", "update", "hive-a", "--claim"], CommandOutput::failed(1, "already claimed"));
        let t = tracker(&runner);
        assert!(t.claim("hive-a", "worker-1"));
        assert!(!t.claim("hive-a", "worker-2"));
    }

    #[test]
    fn status_reads_object_or_array_and_defaults_to_unknown() {
        let runner = ScriptedRunner::new();
        runner.on_json(&["bd", "show", "a"], json!({"id": "a", "status": "in_progress"}));
        runner.on_json(&["bd", "show", "b"], json!([{"id": "b", "status": "too_big"}]));
        runner.on(&["bd", "show", "c"], CommandOutput::failed(1, "not found"));
        let t = tracker(&runner);
        assert_eq!(t.status("a"), TaskStatus::InProgress);
        assert_eq!(t.status("b"), TaskStatus::TooBig);
        assert_eq!(t.status("c"), TaskStatus::Unknown);
    }

    #[test]
    fn set_status_passes_status_and_notes() {
        let runner = ScriptedRunner::new();
        runner.on(&["bd", "update"], CommandOutput::failed(1, "boom"));
        tracker(&runner).set_status("hive-a", TaskStatus::Failed, "Session crashed");
        assert_eq!(
            runner.call_lines(),
            vec!["bd update hive-a --status failed --notes Session crashed"]
        );
    }
}
