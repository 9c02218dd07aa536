//! Dependency-closure rule for picking the next task.

use crate::core::types::{Dependency, ReadyTask, TaskStatus};

/// True when every dependency reports `closed`.
///
/// `done` does not count: only the tracker's closed state releases dependents.
pub fn dependencies_closed(dependencies: &[Dependency]) -> bool {
    dependencies
        .iter()
        .all(|dep| dep.status == TaskStatus::Closed)
}

/// Pick the first ready candidate, in tracker order.
///
/// Candidates with a dependency count of zero are accepted without a lookup.
/// For the others, unknown counts included, `lookup` fetches the dependency set; `None` (lookup failed)
/// skips the candidate.
pub fn first_ready<F>(candidates: &[ReadyTask], mut lookup: F) -> Option<&ReadyTask>
where
    F: FnMut(&ReadyTask) -> Option<Vec<Dependency>>,
{
    candidates.iter().find(|task| {
        if task.dependency_count == Some(0) {
            return true;
        }
        lookup(task).is_some_and(|deps| dependencies_closed(&deps))
    })
}
