//! tmux sessions hosting agent processes.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, CommandRequest, CommandRunner};

/// Default number of captured pane lines that must be exceeded to count as activity.
pub const DEFAULT_ACTIVITY_MIN_LINES: usize = 2;

/// Starts, inspects and kills named tmux sessions.
#[derive(Debug, Clone)]
pub struct Tmux<R> {
    runner: R,
    activity_min_lines: usize,
}

impl<R: CommandRunner> Tmux<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            activity_min_lines: DEFAULT_ACTIVITY_MIN_LINES,
        }
    }

    pub fn with_activity_min_lines(mut self, lines: usize) -> Self {
        self.activity_min_lines = lines;
        self
    }

    /// Replace any session of the same name with a fresh one running `command`.
    #[instrument(skip(self, workdir), fields(workdir = %workdir.display()))]
    pub fn start(&self, session: &str, workdir: &Path, command: &str) -> Result<()> {
        self.kill(session);
        let workdir = workdir.to_string_lossy();
        let created = self.tmux(&["new-session", "-d", "-s", session, "-c", &workdir])?;
        if !created.success() {
            return Err(anyhow!(
                "tmux new-session {session} failed: {}",
                created.stderr.trim()
            ));
        }
        let sent = self.tmux(&["send-keys", "-t", session, command, "Enter"])?;
        if !sent.success() {
            return Err(anyhow!(
                "tmux send-keys {session} failed: {}",
                sent.stderr.trim()
            ));
        }
        debug!("session started");
        Ok(())
    }

    pub fn exists(&self, session: &str) -> bool {
        self.tmux(&["has-session", "-t", session])
            .is_ok_and(|out| out.success())
    }

    /// True if the visible pane holds more than the configured number of lines.
    pub fn has_activity(&self, session: &str) -> bool {
        match self.tmux(&["capture-pane", "-t", session, "-p"]) {
            Ok(out) if out.success() => {
                let lines = out.stdout.trim().lines().count();
                debug!(session, lines, "captured pane");
                lines > self.activity_min_lines
            }
            _ => false,
        }
    }

    /// Kill a session; a missing session is not an error.
    pub fn kill(&self, session: &str) {
        if let Ok(out) = self.tmux(&["kill-session", "-t", session])
            && out.success()
        {
            debug!(session, "session killed");
        }
    }

    fn tmux(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner
            .run(&CommandRequest::new("tmux", args.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn start_kills_stale_session_then_creates_and_sends_keys() {
        let runner = ScriptedRunner::new();
        let tmux = Tmux::new(runner.clone());
        tmux.start("hive-w-t", Path::new("/repo/worktrees/w-t"), "claude-code")
            .expect("start");
        assert_eq!(
            runner.call_lines(),
            vec![
                "tmux kill-session -t hive-w-t",
                "tmux new-session -d -s hive-w-t -c /repo/worktrees/w-t",
                "tmux send-keys -t hive-w-t claude-code Enter",
            ]
        );
    }

    #[test]
    fn start_reports_creation_failure() {
        let runner = ScriptedRunner::new();
        runner.on(&["tmux", "new-session"], CommandOutput::failed(1, "no server"));
        let err = Tmux::new(runner.clone())
            .start("s", Path::new("/tmp"), "agent")
            .expect_err("fails");
        assert!(err.to_string().contains("no server"));
        assert!(!runner.was_called(&["tmux", "send-keys"]));
    }

    #[test]
    fn activity_requires_more_than_threshold_lines() {
        let runner = ScriptedRunner::new();
        runner
            .on(&["tmux", "capture-pane"], CommandOutput::ok("$ claude-code\n\n\n"))
            .on(&["tmux", "capture-pane"], CommandOutput::ok("$ claude-code\nthinking\nediting\n"));
        let tmux = Tmux::new(runner);
        assert!(!tmux.has_activity("s"));
        assert!(tmux.has_activity("s"));
    }

    #[test]
    fn activity_threshold_is_tunable() {
        let runner = ScriptedRunner::new();
        runner.on(&["tmux", "capture-pane"], CommandOutput::ok("a\nb\nc\n"));
        let tmux = Tmux::new(runner).with_activity_min_lines(3);
        assert!(!tmux.has_activity("s"));
    }

    #[test]
    fn missing_session_has_no_activity_and_does_not_exist() {
        let runner = ScriptedRunner::new();
        runner
            .on(&["tmux", "capture-pane"], CommandOutput::failed(1, "can't find session"))
            .on(&["tmux", "has-session"], CommandOutput::failed(1, "can't find session"))
            .on(&["tmux", "kill-session"], CommandOutput::failed(1, "can't find session"));
        let tmux = Tmux::new(runner);
        assert!(!tmux.has_activity("s"));
        assert!(!tmux.exists("s"));
        tmux.kill("s");
    }
}
