//! Parallel worker pool: N independent `hive work` processes.
//!
//! Workers coordinate only through the tracker's atomic claim, the registry
//! file and the merge lock, so each one is a separate OS process.

use std::path::Path;
use std::process::{Child, Command};

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};

use crate::ralph::WorkOverrides;

/// Worker id for the `index`-th pool member (1-based).
pub fn pool_worker_id(index: usize) -> String {
    format!("worker-{index}")
}

/// Arguments for one child `hive work` process.
pub fn worker_command_args(index: usize, overrides: &WorkOverrides) -> Vec<String> {
    let mut args = vec![
        "work".to_string(),
        "--parallel".to_string(),
        "1".to_string(),
        "--worker-id".to_string(),
        pool_worker_id(index),
    ];
    let numeric = [
        ("--poll-interval", overrides.poll_interval),
        ("--task-timeout", overrides.task_timeout),
        ("--spawn-grace", overrides.spawn_grace),
    ];
    for (flag, value) in numeric {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    }
    if let Some(command) = &overrides.agent_command {
        args.push("--agent-command".to_string());
        args.push(command.clone());
    }
    args
}

/// Exit status of one pool member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub worker_id: String,
    /// `None` if the process could not be spawned or was killed by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerExit>,
}

impl PoolReport {
    pub fn all_succeeded(&self) -> bool {
        self.workers.iter().all(WorkerExit::succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &WorkerExit> {
        self.workers.iter().filter(|w| !w.succeeded())
    }
}

/// Spawn `count` workers from `exe` in `root` and wait for all of them.
pub fn run_pool(
    exe: &Path,
    root: &Path,
    count: usize,
    overrides: &WorkOverrides,
) -> Result<PoolReport> {
    if count == 0 {
        return Err(anyhow!("--parallel must be at least 1"));
    }
    info!(count, "starting worker pool");

    let mut children: Vec<(String, Option<Child>)> = Vec::with_capacity(count);
    for index in 1..=count {
        let worker_id = pool_worker_id(index);
        let spawned = Command::new(exe)
            .args(worker_command_args(index, overrides))
            .current_dir(root)
            .spawn();
        match spawned {
            Ok(child) => {
                info!(worker = %worker_id, pid = child.id(), "worker started");
                children.push((worker_id, Some(child)));
            }
            Err(err) => {
                error!(worker = %worker_id, err = %err, "worker failed to start");
                children.push((worker_id, None));
            }
        }
    }

    let mut report = PoolReport::default();
    for (worker_id, child) in children {
        let code = match child {
            Some(mut child) => match child.wait() {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(worker = %worker_id, err = %err, "wait failed");
                    None
                }
            },
            None => None,
        };
        info!(worker = %worker_id, code = ?code, "worker exited");
        report.workers.push(WorkerExit { worker_id, code });
    }
    Ok(report)
}
