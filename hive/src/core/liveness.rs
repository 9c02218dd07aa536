//! Liveness and disposition rules for supervised agents.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::types::{TaskOutcome, TaskStatus, WorkerRecord};

/// Decide whether a freshly spawned agent is alive once the grace period has elapsed.
///
/// Checks run lazily in a fixed order: tracker status first (any change away
/// from `in_progress` counts as activity), then terminal output, then session
/// existence. A live session without output is assumed to be working.
pub fn spawn_is_alive<A, E>(status: TaskStatus, has_activity: A, session_exists: E) -> bool
where
    A: FnOnce() -> bool,
    E: FnOnce() -> bool,
{
    if status != TaskStatus::InProgress {
        return true;
    }
    if has_activity() {
        return true;
    }
    session_exists()
}

/// What happens to a workspace after its task reached an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Merge the task branch; keep the workspace only if the merge fails.
    MergeThenRemove,
    /// Preserve for human inspection.
    Keep,
    Remove,
}

pub fn disposition(outcome: TaskOutcome) -> Disposition {
    match outcome {
        TaskOutcome::Done => Disposition::MergeThenRemove,
        TaskOutcome::Blocked => Disposition::Keep,
        TaskOutcome::TooBig
        | TaskOutcome::Failed
        | TaskOutcome::Timeout
        | TaskOutcome::Crashed
        | TaskOutcome::Unexpected(_) => Disposition::Remove,
    }
}

/// A registry entry whose heartbeat is older than the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckWorker {
    pub record: WorkerRecord,
    pub stuck_for: Duration,
}

/// Workers whose `last_activity` is at least `threshold` before `now`.
pub fn find_stuck(
    records: &[WorkerRecord],
    now: DateTime<Utc>,
    threshold: Duration,
) -> Vec<StuckWorker> {
    records
        .iter()
        .filter_map(|record| {
            let age = now
                .signed_duration_since(record.last_activity)
                .to_std()
                .unwrap_or_default();
            (age >= threshold).then(|| StuckWorker {
                record: record.clone(),
                stuck_for: age,
            })
        })
        .collect()
}
