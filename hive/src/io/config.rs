//! Hive configuration stored at `.hive/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::git::Git;
use crate::io::process::CommandRunner;
use crate::io::session::DEFAULT_ACTIVITY_MIN_LINES;
use crate::io::store::write_atomic;

/// Fallback when neither config nor `origin` names a default branch.
pub const FALLBACK_DEFAULT_BRANCH: &str = "main";

/// Hive configuration (TOML).
///
/// Edited by humans; every section and field is optional and falls back to
/// the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HiveConfig {
    pub hive: HiveSection,
    pub workers: WorkersConfig,
    pub worktrees: WorktreesConfig,
    pub agent: AgentConfig,
    pub branch: BranchConfig,
    pub tracker: TrackerConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HiveSection {
    pub version: String,
}

impl Default for HiveSection {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Delay after spawning an agent before liveness is first checked.
    pub spawn_grace_period_seconds: u64,
    pub max_parallel_workers: usize,
    /// Seconds between supervision polls.
    pub poll_interval: u64,
    /// Wall-clock limit per task in seconds.
    pub task_timeout: u64,
    /// Pane lines that must be exceeded before a session counts as active.
    pub activity_min_lines: usize,
    /// Pause after losing a claim race.
    pub claim_retry_delay_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            spawn_grace_period_seconds: 30,
            max_parallel_workers: 1,
            poll_interval: 5,
            task_timeout: 3600,
            activity_min_lines: DEFAULT_ACTIVITY_MIN_LINES,
            claim_retry_delay_seconds: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorktreesConfig {
    /// Directory holding task worktrees, relative to the repository root.
    pub base_dir: String,
}

impl Default for WorktreesConfig {
    fn default() -> Self {
        Self {
            base_dir: "worktrees".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command typed into the agent's session.
    pub command: String,
    pub shell: String,
    /// File written into each workspace with the task instructions.
    pub context_file: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude-code".to_string(),
            shell: "bash".to_string(),
            context_file: "CLAUDE.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BranchConfig {
    /// Empty means "ask origin".
    pub default_branch: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            default_branch: FALLBACK_DEFAULT_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    pub command: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            command: "bd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub check_interval: u64,
    /// Heartbeat age in seconds after which a worker counts as stuck.
    pub stuck_threshold: u64,
    pub notify: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval: 60,
            stuck_threshold: 300,
            notify: false,
        }
    }
}

impl HiveConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.workers;
        if w.poll_interval == 0 {
            return Err(anyhow!("workers.poll_interval must be > 0"));
        }
        if w.task_timeout == 0 {
            return Err(anyhow!("workers.task_timeout must be > 0"));
        }
        if w.max_parallel_workers == 0 {
            return Err(anyhow!("workers.max_parallel_workers must be >= 1"));
        }
        if self.worktrees.base_dir.trim().is_empty() {
            return Err(anyhow!("worktrees.base_dir must not be empty"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        if self.agent.context_file.trim().is_empty() {
            return Err(anyhow!("agent.context_file must not be empty"));
        }
        if self.tracker.command.trim().is_empty() {
            return Err(anyhow!("tracker.command must not be empty"));
        }
        if self.daemon.check_interval == 0 {
            return Err(anyhow!("daemon.check_interval must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HiveConfig::default()`.
pub fn load_config(path: &Path) -> Result<HiveConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = HiveConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HiveConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &HiveConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Branch that finished task branches merge into.
///
/// Uses `branch.default_branch` when set, otherwise asks `origin`, otherwise
/// falls back to `main`.
pub fn resolve_default_branch<R: CommandRunner>(cfg: &HiveConfig, git: &Git<R>) -> String {
    let configured = cfg.branch.default_branch.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    git.remote_default_branch()
        .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::CommandOutput;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, HiveConfig::default());
        assert_eq!(cfg.workers.spawn_grace_period_seconds, 30);
        assert_eq!(cfg.workers.poll_interval, 5);
        assert_eq!(cfg.workers.task_timeout, 3600);
        assert_eq!(cfg.agent.command, "claude-code");
        assert_eq!(cfg.branch.default_branch, "main");
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = HiveConfig::default();
        cfg.workers.max_parallel_workers = 4;
        cfg.daemon.notify = true;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[workers]\npoll_interval = 10\n\n[branch]\n\n[agent]\ncommand = \"codex\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.workers.poll_interval, 10);
        assert_eq!(cfg.workers.task_timeout, 3600);
        assert_eq!(cfg.agent.command, "codex");
        assert_eq!(cfg.agent.context_file, "CLAUDE.md");
        assert_eq!(cfg.branch.default_branch, "main");
        assert_eq!(cfg.worktrees.base_dir, "worktrees");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[workers]\npoll_interval = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("poll_interval"));
    }

    #[test]
    fn configured_default_branch_wins() {
        let runner = ScriptedRunner::new();
        let mut cfg = HiveConfig::default();
        cfg.branch.default_branch = "develop".to_string();
        let git = Git::new(runner.clone(), "/repo");
        assert_eq!(resolve_default_branch(&cfg, &git), "develop");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn empty_default_branch_asks_origin() {
        let runner = ScriptedRunner::new();
        runner.on(
            &["git", "symbolic-ref"],
            CommandOutput::ok("refs/remotes/origin/master\n"),
        );
        let mut cfg = HiveConfig::default();
        cfg.branch.default_branch = String::new();
        assert_eq!(
            resolve_default_branch(&cfg, &Git::new(runner, "/repo")),
            "master"
        );
    }

    #[test]
    fn empty_default_branch_without_origin_falls_back_to_main() {
        let runner = ScriptedRunner::new();
        runner.on(&["git", "symbolic-ref"], CommandOutput::failed(128, "fatal"));
        let mut cfg = HiveConfig::default();
        cfg.branch.default_branch = String::new();
        assert_eq!(
            resolve_default_branch(&cfg, &Git::new(runner, "/repo")),
            "main"
        );
    }
}
