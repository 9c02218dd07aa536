//! Test-only helpers: scripted commands, a fake clock and throwaway repositories.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::clock::Clock;
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner};

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<CommandOutput>,
}

#[derive(Debug, Default)]
struct ScriptState {
    rules: Vec<Rule>,
    calls: Vec<CommandRequest>,
}

/// Command runner that answers from a script and records every call.
///
/// Responses are keyed by argv prefix; the longest matching prefix wins.
/// Each prefix has a queue of responses: they are consumed in order and the
/// last one repeats forever. Unscripted commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `output` for commands whose argv starts with `prefix`.
    pub fn on(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        let prefix: Vec<String> = prefix.iter().map(|s| (*s).to_string()).collect();
        let mut state = self.state();
        match state.rules.iter().position(|r| r.prefix == prefix) {
            Some(idx) => state.rules[idx].responses.push_back(output),
            None => state.rules.push(Rule {
                prefix,
                responses: VecDeque::from([output]),
            }),
        }
        self
    }

    /// Queue a JSON payload as successful stdout.
    pub fn on_json(&self, prefix: &[&str], value: serde_json::Value) -> &Self {
        self.on(prefix, CommandOutput::ok(value.to_string()))
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.state().calls.clone()
    }

    /// Every call rendered as `program arg arg ...`.
    pub fn call_lines(&self) -> Vec<String> {
        self.state().calls.iter().map(ToString::to_string).collect()
    }

    /// Calls whose argv starts with `prefix`.
    pub fn calls_matching(&self, prefix: &[&str]) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|req| starts_with(req, prefix))
            .map(ToString::to_string)
            .collect()
    }

    pub fn was_called(&self, prefix: &[&str]) -> bool {
        !self.calls_matching(prefix).is_empty()
    }
}

fn starts_with<S: AsRef<str>>(request: &CommandRequest, prefix: &[S]) -> bool {
    let argv: Vec<&str> = request.argv().collect();
    argv.len() >= prefix.len() && prefix.iter().zip(&argv).all(|(p, a)| p.as_ref() == *a)
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let mut state = self.state();
        state.calls.push(request.clone());
        let rule = state
            .rules
            .iter_mut()
            .filter(|rule| starts_with(request, rule.prefix.as_slice()))
            .max_by_key(|rule| rule.prefix.len());
        let Some(rule) = rule else {
            return Ok(CommandOutput::ok(""));
        };
        let output = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }
}

/// Clock whose time only advances when something sleeps.
#[derive(Debug, Clone)]
pub struct FakeClock {
    start: Instant,
    state: Arc<Mutex<FakeClockState>>,
}

#[derive(Debug, Default)]
struct FakeClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.state().elapsed
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.state().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// A git repository in a temp directory with one commit on `main`.
#[derive(Debug)]
pub struct TestRepo {
    _dir: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let root = fs::canonicalize(dir.path()).context("canonicalize temp dir")?;
        let repo = Self { _dir: dir, root };
        repo.git(&["init", "--quiet", "--initial-branch=main"])?;
        repo.git(&["config", "user.email", "hive@example.invalid"])?;
        repo.git(&["config", "user.name", "Hive Test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.commit_file("README.md", "# test\n", "initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write `contents` to `rel` and commit it on the current branch.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        self.commit_file_in(&self.root, rel, contents, message)
    }

    /// Same as [`Self::commit_file`] but inside another worktree.
    pub fn commit_file_in(
        &self,
        dir: &Path,
        rel: &str,
        contents: &str,
        message: &str,
    ) -> Result<()> {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        git_in(dir, &["add", "--", rel])?;
        git_in(dir, &["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Run git in the repository root, returning stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git_in(&self.root, args)
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
