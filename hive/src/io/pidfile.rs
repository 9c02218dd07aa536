//! PID file guarding the single monitor daemon instance.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info};

/// PID file at a fixed path; only the daemon itself writes it.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID of the running daemon, if any.
    ///
    /// A file naming a dead (or unparseable) PID is stale and gets removed.
    pub fn running_pid(&self) -> Option<u32> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match raw.trim().parse::<u32>() {
            Ok(pid) if process_alive(pid) => Some(pid),
            _ => {
                debug!(path = %self.path.display(), "removing stale pid file");
                let _ = fs::remove_file(&self.path);
                None
            }
        }
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&self.path, format!("{pid}\n"))
            .with_context(|| format!("write {}", self.path.display()))
    }

    pub fn remove(&self) {
        if fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "pid file removed");
        }
    }

    /// Send SIGTERM to the running daemon and remove the PID file.
    pub fn terminate(&self) -> Result<u32> {
        let pid = self
            .running_pid()
            .ok_or_else(|| anyhow!("daemon is not running"))?;
        signal::kill(to_pid(pid)?, Signal::SIGTERM)
            .with_context(|| format!("send SIGTERM to {pid}"))?;
        self.remove();
        info!(pid, "daemon stopped");
        Ok(pid)
    }
}

/// Signal-0 probe.
pub fn process_alive(pid: u32) -> bool {
    match to_pid(pid) {
        Ok(pid) => signal::kill(pid, None).is_ok(),
        Err(_) => false,
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    let raw = i32::try_from(pid).map_err(|_| anyhow!("pid {pid} out of range"))?;
    if raw <= 0 {
        return Err(anyhow!("invalid pid {pid}"));
    }
    Ok(Pid::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_pid_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pidfile = PidFile::new(temp.path().join("daemon.pid"));
        pidfile.write(std::process::id()).expect("write");
        assert_eq!(pidfile.running_pid(), Some(std::process::id()));
        assert!(pidfile.path().exists());
    }

    #[test]
    fn stale_pid_file_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pidfile = PidFile::new(temp.path().join("daemon.pid"));
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead = child.id();
        child.wait().expect("wait");
        pidfile.write(dead).expect("write");

        assert_eq!(pidfile.running_pid(), None);
        assert!(!pidfile.path().exists());
    }

    #[test]
    fn garbage_pid_file_is_stale() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("daemon.pid");
        fs::write(&path, "not-a-pid").expect("write");
        assert_eq!(PidFile::new(&path).running_pid(), None);
        assert!(!path.exists());
    }

    #[test]
    fn terminate_without_daemon_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = PidFile::new(temp.path().join("daemon.pid"))
            .terminate()
            .expect_err("not running");
        assert!(err.to_string().contains("not running"));
    }
}
