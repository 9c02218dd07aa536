//! `.hive/` layout and `hive init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{HiveConfig, load_config, write_config};
use super::plan::DRAFT_PLAN;
use super::registry::Registry;

const WORKSPACES_GITIGNORE: &str =
    "# Ignore all worktrees (they're git worktrees, not regular files)\n*\n!.gitignore\n";

/// Canonical paths within a project using hive.
#[derive(Debug, Clone)]
pub struct HivePaths {
    pub root: PathBuf,
    pub hive_dir: PathBuf,
    pub beads_dir: PathBuf,
    pub config_path: PathBuf,
    pub workers_path: PathBuf,
    pub plan_path: PathBuf,
    pub merge_lock_path: PathBuf,
    pub daemon_pid_path: PathBuf,
    pub daemon_log_path: PathBuf,
}

impl HivePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let hive_dir = root.join(".hive");
        Self {
            beads_dir: root.join(".beads"),
            config_path: hive_dir.join("config.toml"),
            workers_path: hive_dir.join("workers.json"),
            plan_path: hive_dir.join("plan.md"),
            merge_lock_path: hive_dir.join("merge.lock"),
            daemon_pid_path: hive_dir.join("daemon.pid"),
            daemon_log_path: hive_dir.join("daemon.log"),
            hive_dir,
            root,
        }
    }

    pub fn registry(&self) -> Registry {
        Registry::new(&self.workers_path)
    }

    pub fn workspaces_dir(&self, cfg: &HiveConfig) -> PathBuf {
        self.root.join(&cfg.worktrees.base_dir)
    }

    /// Fail unless `.hive/` exists.
    pub fn ensure_hive(&self) -> Result<()> {
        if !self.hive_dir.is_dir() {
            return Err(anyhow!(
                "hive not initialized ({} not found); run `hive init` first",
                self.hive_dir.display()
            ));
        }
        Ok(())
    }

    /// Fail unless `.beads/` exists.
    pub fn ensure_tracker(&self) -> Result<()> {
        if !self.beads_dir.is_dir() {
            return Err(anyhow!(
                "beads not initialized ({} not found); run `bd init` first",
                self.beads_dir.display()
            ));
        }
        Ok(())
    }

    /// Startup checks shared by commands that drive workers; returns the loaded config.
    pub fn preflight(&self) -> Result<HiveConfig> {
        self.ensure_tracker()?;
        self.ensure_hive()?;
        load_config(&self.config_path)
    }
}

/// Options for [`init_hive`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing `.hive/`.
    pub force: bool,
}

/// Create `.hive/` scaffolding and the workspaces directory in `root`.
pub fn init_hive(root: &Path, options: &InitOptions) -> Result<HivePaths> {
    let paths = HivePaths::new(root);
    paths.ensure_tracker()?;
    if paths.hive_dir.exists() && !options.force {
        return Err(anyhow!(
            "hive init: .hive already exists (use --force to reinitialize)"
        ));
    }
    if paths.hive_dir.exists() && !paths.hive_dir.is_dir() {
        return Err(anyhow!("hive init: .hive exists but is not a directory"));
    }

    fs::create_dir_all(&paths.hive_dir)
        .with_context(|| format!("create directory {}", paths.hive_dir.display()))?;
    let cfg = HiveConfig::default();
    write_config(&paths.config_path, &cfg)?;
    paths.registry().reset()?;
    fs::write(&paths.plan_path, DRAFT_PLAN)
        .with_context(|| format!("write {}", paths.plan_path.display()))?;

    let workspaces = paths.workspaces_dir(&cfg);
    fs::create_dir_all(&workspaces)
        .with_context(|| format!("create directory {}", workspaces.display()))?;
    let gitignore = workspaces.join(".gitignore");
    fs::write(&gitignore, WORKSPACES_GITIGNORE)
        .with_context(|| format!("write {}", gitignore.display()))?;

    info!(root = %root.display(), "hive initialized");
    Ok(paths)
}
