//! Stuck-worker monitor and its background-service lifecycle.
//!
//! The monitor periodically reads the worker registry and reports every
//! worker whose heartbeat is older than the stuck threshold. It only
//! observes: stuck workers are logged (and optionally announced with a
//! desktop notification), never killed.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::liveness::{StuckWorker, find_stuck};
use crate::io::clock::Clock;
use crate::io::config::DaemonConfig;
use crate::io::init::HivePaths;
use crate::io::pidfile::PidFile;
use crate::io::process::{CommandRequest, CommandRunner};
use crate::io::registry::Registry;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_CHECK_DELAY: Duration = Duration::from_millis(200);
const FOLLOW_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub stuck_threshold: Duration,
    pub notify: bool,
}

impl MonitorSettings {
    pub fn from_config(cfg: &DaemonConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(cfg.check_interval),
            stuck_threshold: Duration::from_secs(cfg.stuck_threshold),
            notify: cfg.notify,
        }
    }
}

pub fn stuck_message(stuck: &StuckWorker) -> String {
    format!(
        "Worker {} stuck on task {} for {}s",
        stuck.record.id,
        stuck.record.current_task,
        stuck.stuck_for.as_secs()
    )
}

/// Periodic registry scan.
pub struct Monitor<R, C> {
    registry: Registry,
    settings: MonitorSettings,
    runner: R,
    clock: C,
}

impl<R: CommandRunner, C: Clock> Monitor<R, C> {
    pub fn new(registry: Registry, settings: MonitorSettings, runner: R, clock: C) -> Self {
        Self {
            registry,
            settings,
            runner,
            clock,
        }
    }

    /// One scan of the registry.
    pub fn tick(&self) -> Result<Vec<StuckWorker>> {
        let records = self.registry.list()?;
        let stuck = find_stuck(&records, Utc::now(), self.settings.stuck_threshold);
        debug!(workers = records.len(), stuck = stuck.len(), "registry scanned");
        for worker in &stuck {
            let message = stuck_message(worker);
            warn!("{message}");
            if self.settings.notify {
                self.notify(&message);
            }
        }
        Ok(stuck)
    }

    /// Scan every `check_interval`. Runs forever unless `max_ticks` is set.
    pub fn run(&self, max_ticks: Option<u64>) {
        info!(
            check_interval_secs = self.settings.check_interval.as_secs(),
            stuck_threshold_secs = self.settings.stuck_threshold.as_secs(),
            notify = self.settings.notify,
            "monitor started"
        );
        let mut ticks = 0u64;
        loop {
            if let Err(err) = self.tick() {
                error!(err = %format!("{err:#}"), "monitor tick failed");
            }
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            self.clock.sleep(self.settings.check_interval);
        }
    }

    fn notify(&self, message: &str) {
        let request = CommandRequest::new("notify-send", ["Hive: worker stuck", message])
            .timeout(NOTIFY_TIMEOUT);
        match self.runner.run(&request) {
            Ok(out) if out.success() => debug!("notification sent"),
            Ok(out) => debug!(
                stderr = %out.stderr.trim(),
                timed_out = out.timed_out,
                "notification failed"
            ),
            Err(err) => debug!(err = %format!("{err:#}"), "notify-send unavailable"),
        }
    }
}

/// Run the monitor in this process, owning the PID file for its lifetime.
pub fn run_foreground<R: CommandRunner, C: Clock>(
    paths: &HivePaths,
    monitor: &Monitor<R, C>,
    max_ticks: Option<u64>,
) -> Result<()> {
    let pidfile = PidFile::new(&paths.daemon_pid_path);
    let own = std::process::id();
    if let Some(pid) = pidfile.running_pid()
        && pid != own
    {
        return Err(anyhow!("daemon already running (pid {pid})"));
    }
    pidfile.write(own)?;
    info!(pid = own, "daemon running in foreground");
    monitor.run(max_ticks);
    pidfile.remove();
    Ok(())
}

/// Arguments the detached daemon is re-executed with.
pub fn background_args(settings: &MonitorSettings) -> Vec<String> {
    let mut args = vec![
        "daemon".to_string(),
        "start".to_string(),
        "--foreground".to_string(),
        "--check-interval".to_string(),
        settings.check_interval.as_secs().to_string(),
        "--stuck-threshold".to_string(),
        settings.stuck_threshold.as_secs().to_string(),
    ];
    if settings.notify {
        args.push("--notify".to_string());
    }
    args
}

/// Re-execute `exe` as a detached daemon with output appended to the daemon log.
///
/// Returns the child PID once it has survived a short startup check.
pub fn spawn_background(
    exe: &Path,
    paths: &HivePaths,
    settings: &MonitorSettings,
) -> Result<u32> {
    let pidfile = PidFile::new(&paths.daemon_pid_path);
    if let Some(pid) = pidfile.running_pid() {
        return Err(anyhow!("daemon already running (pid {pid})"));
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.daemon_log_path)
        .with_context(|| format!("open {}", paths.daemon_log_path.display()))?;
    let log_err = log.try_clone().context("duplicate daemon log handle")?;

    let mut child = Command::new(exe)
        .args(background_args(settings))
        .current_dir(&paths.root)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0)
        .spawn()
        .context("spawn daemon process")?;
    let pid = child.id();

    std::thread::sleep(STARTUP_CHECK_DELAY);
    if let Some(status) = child.try_wait().context("check daemon process")? {
        return Err(anyhow!(
            "daemon exited immediately ({status}); see {}",
            paths.daemon_log_path.display()
        ));
    }
    info!(pid, log = %paths.daemon_log_path.display(), "daemon started");
    Ok(pid)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StuckWorkerView {
    pub worker_id: String,
    pub task_id: String,
    pub tmux_session: String,
    pub stuck_seconds: u64,
}

impl From<&StuckWorker> for StuckWorkerView {
    fn from(stuck: &StuckWorker) -> Self {
        Self {
            worker_id: stuck.record.id.clone(),
            task_id: stuck.record.current_task.clone(),
            tmux_session: stuck.record.tmux_session.clone(),
            stuck_seconds: stuck.stuck_for.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub stuck_workers: Vec<StuckWorkerView>,
}

/// Daemon liveness plus, when it is running, the currently stuck workers.
pub fn daemon_status(paths: &HivePaths, threshold: Duration) -> Result<DaemonStatus> {
    let pid = PidFile::new(&paths.daemon_pid_path).running_pid();
    let stuck_workers = match pid {
        Some(_) => {
            let records = paths.registry().list()?;
            find_stuck(&records, Utc::now(), threshold)
                .iter()
                .map(StuckWorkerView::from)
                .collect()
        }
        None => Vec::new(),
    };
    Ok(DaemonStatus {
        running: pid.is_some(),
        pid,
        stuck_workers,
    })
}

/// Last `count` lines of the log file.
pub fn tail_lines(path: &Path, count: usize) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].iter().map(|l| (*l).to_string()).collect())
}

/// Copy data appended to `path` after `offset` into `out` until `keep_going` says stop.
pub fn follow_log<W, C, F>(
    path: &Path,
    mut offset: u64,
    out: &mut W,
    clock: &C,
    mut keep_going: F,
) -> Result<()>
where
    W: Write,
    C: Clock,
    F: FnMut() -> bool,
{
    loop {
        let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let len = file.metadata()?.len();
        if len < offset {
            debug!("log truncated, restarting from the beginning");
            offset = 0;
        }
        if len > offset {
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = Vec::new();
            file.read_to_end(&mut chunk)?;
            out.write_all(&chunk)?;
            out.flush()?;
            offset += chunk.len() as u64;
        }
        if !keep_going() {
            return Ok(());
        }
        clock.sleep(FOLLOW_POLL);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeDelta;

    use super::*;
    use crate::core::types::WorkerRecord;
    use crate::io::process::CommandOutput;
    use crate::test_support::{FakeClock, ScriptedRunner};

    fn record(id: &str, idle_secs: i64) -> WorkerRecord {
        let now = Utc::now();
        WorkerRecord {
            id: id.to_string(),
            pid: 4242,
            tmux_session: format!("hive-{id}-hive-a"),
            worktree: PathBuf::from("/tmp/worktrees/x"),
            current_task: "hive-a".to_string(),
            started_at: now - TimeDelta::seconds(idle_secs),
            last_activity: now - TimeDelta::seconds(idle_secs),
        }
    }

    fn settings(notify: bool) -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(300),
            notify,
        }
    }

    #[test]
    fn tick_reports_and_notifies_stuck_workers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        registry.register(record("worker-1", 400)).expect("register");
        registry.register(record("worker-2", 10)).expect("register");

        let runner = ScriptedRunner::new();
        runner.on(&["notify-send"], CommandOutput::failed(1, "no display"));
        let monitor = Monitor::new(registry, settings(true), runner.clone(), FakeClock::new());
        let stuck = monitor.tick().expect("tick");

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].record.id, "worker-1");
        assert!(stuck_message(&stuck[0]).starts_with("Worker worker-1 stuck on task hive-a for 4"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].timeout, Some(NOTIFY_TIMEOUT));
    }

    #[test]
    fn run_sleeps_between_ticks_without_notifying() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        registry.register(record("worker-1", 900)).expect("register");
        let runner = ScriptedRunner::new();
        let clock = FakeClock::new();
        Monitor::new(registry, settings(false), runner.clone(), clock.clone()).run(Some(3));

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 2]);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn foreground_run_writes_and_removes_pid_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HivePaths::new(temp.path());
        fs::create_dir_all(&paths.hive_dir).expect("hive dir");
        let monitor = Monitor::new(
            paths.registry(),
            settings(false),
            ScriptedRunner::new(),
            FakeClock::new(),
        );
        run_foreground(&paths, &monitor, Some(1)).expect("run");
        assert!(!paths.daemon_pid_path.exists());

        let status = daemon_status(&paths, Duration::from_secs(300)).expect("status");
        assert!(!status.running);
        assert!(status.stuck_workers.is_empty());
    }

    #[test]
    fn status_lists_stuck_workers_while_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HivePaths::new(temp.path());
        fs::create_dir_all(&paths.hive_dir).expect("hive dir");
        paths.registry().register(record("worker-3", 600)).expect("register");
        PidFile::new(&paths.daemon_pid_path)
            .write(std::process::id())
            .expect("pid");

        let status = daemon_status(&paths, Duration::from_secs(300)).expect("status");
        assert!(status.running);
        assert_eq!(status.pid, Some(std::process::id()));
        assert_eq!(status.stuck_workers.len(), 1);
        assert_eq!(status.stuck_workers[0].worker_id, "worker-3");
        assert!(status.stuck_workers[0].stuck_seconds >= 600);
    }

    #[test]
    fn background_args_round_trip_settings() {
        let args = background_args(&settings(true));
        assert_eq!(
            args,
            [
                "daemon",
                "start",
                "--foreground",
                "--check-interval",
                "60",
                "--stuck-threshold",
                "300",
                "--notify"
            ]
        );
    }

    #[test]
    fn tail_returns_last_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("daemon.log");
        fs::write(&path, "one\ntwo\nthree\n").expect("write");
        assert_eq!(tail_lines(&path, 2).expect("tail"), ["two", "three"]);
        assert_eq!(tail_lines(&path, 20).expect("tail").len(), 3);
    }

    #[test]
    fn follow_copies_appended_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("daemon.log");
        fs::write(&path, "old\n").expect("write");
        let clock = FakeClock::new();
        let mut out = Vec::new();
        let mut polls = 0;
        follow_log(&path, 4, &mut out, &clock, || {
            polls += 1;
            if polls == 1 {
                let mut file = OpenOptions::new().append(true).open(&path).expect("open");
                file.write_all(b"new\n").expect("append");
            }
            polls < 2
        })
        .expect("follow");
        assert_eq!(String::from_utf8(out).expect("utf8"), "new\n");
        assert_eq!(clock.sleeps(), vec![FOLLOW_POLL]);
    }
}
