//! `hive`: run coding agents against a tracker's task queue in parallel
//! git worktrees.

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use hive::daemon::{
    Monitor, MonitorSettings, daemon_status, follow_log, run_foreground, spawn_background,
    tail_lines,
};
use hive::exit_codes;
use hive::io::clock::SystemClock;
use hive::io::config::{HiveConfig, load_config, resolve_default_branch};
use hive::io::git::Git;
use hive::io::init::{HivePaths, InitOptions, init_hive};
use hive::io::pidfile::PidFile;
use hive::io::plan::{ApproveOutcome, approve_plan, create_plan, read_plan};
use hive::io::process::SystemRunner;
use hive::io::tracker::Tracker;
use hive::io::workspace::WorkspaceManager;
use hive::logging;
use hive::merge::{
    AssistOptions, AssistOutcome, LocatedWorkspace, MergeAssist, SyncAction, SyncOptions,
    available_workspaces, inspect_workspace, locate_workspace, sync_branches, task_branches,
};
use hive::pool::run_pool;
use hive::ralph::{LoopSettings, RalphLoop, WorkOverrides};
use hive::status::{collect_status, render_status};
use hive::task::{TaskCommand, passthrough};

#[derive(Parser)]
#[command(
    name = "hive",
    version,
    about = "Orchestrate coding agents over a task tracker using git worktrees"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.hive/` and the workspaces directory (requires `.beads/`).
    Init {
        /// Overwrite an existing `.hive/`.
        #[arg(short, long)]
        force: bool,
    },
    /// Create, show or approve the plan document.
    Plan {
        /// Goal to write a fresh plan for.
        goal: Option<String>,
        #[arg(long)]
        show: bool,
        #[arg(long)]
        approve: bool,
    },
    /// Run the Ralph loop until no task is ready.
    Work(WorkArgs),
    /// Show active workers and task progress.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Finish a preserved workspace by hand: merge it or clean it up.
    Merge {
        /// Workspace path, task id or `<worker>-<task>` name.
        identifier: String,
        /// Skip the merge; remove the workspace and branch only.
        #[arg(long)]
        cleanup_only: bool,
        /// Clean up even with uncommitted changes.
        #[arg(long)]
        force: bool,
    },
    /// Push and/or pull every task branch.
    Sync {
        #[arg(long)]
        push: bool,
        #[arg(long)]
        pull: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Tracker pass-through.
    #[command(subcommand)]
    Task(TaskCmd),
    /// Stuck-worker monitor.
    #[command(subcommand)]
    Daemon(DaemonCmd),
}

#[derive(Args, Debug, Default)]
struct WorkArgs {
    #[arg(long)]
    worker_id: Option<String>,
    /// Seconds between supervision polls.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,
    /// Per-task limit in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    task_timeout: Option<u64>,
    /// Seconds to wait before the first liveness check.
    #[arg(long)]
    spawn_grace: Option<u64>,
    /// Command typed into the agent session.
    #[arg(long)]
    agent_command: Option<String>,
    /// Number of worker processes (default: workers.max_parallel_workers).
    #[arg(long)]
    parallel: Option<usize>,
}

impl WorkArgs {
    fn overrides(&self) -> WorkOverrides {
        WorkOverrides {
            poll_interval: self.poll_interval,
            task_timeout: self.task_timeout,
            spawn_grace: self.spawn_grace,
            agent_command: self.agent_command.clone(),
        }
    }
}

#[derive(Subcommand)]
enum TaskCmd {
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Record discovered work.
    Add {
        description: String,
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=4))]
        priority: u8,
        #[arg(long = "type", default_value = "task")]
        task_type: String,
        #[arg(long)]
        discovered_from: Option<String>,
    },
    /// Mark a task as too big for one agent session.
    TooBig { id: String },
}

impl From<TaskCmd> for TaskCommand {
    fn from(cmd: TaskCmd) -> Self {
        match cmd {
            TaskCmd::List { status, json } => TaskCommand::List { status, json },
            TaskCmd::Show { id, json } => TaskCommand::Show { id, json },
            TaskCmd::Add {
                description,
                priority,
                task_type,
                discovered_from,
            } => TaskCommand::Add {
                description,
                priority,
                task_type,
                discovered_from,
            },
            TaskCmd::TooBig { id } => TaskCommand::TooBig { id },
        }
    }
}

#[derive(Subcommand)]
enum DaemonCmd {
    Start {
        #[arg(long)]
        check_interval: Option<u64>,
        #[arg(long)]
        stuck_threshold: Option<u64>,
        #[arg(long)]
        notify: bool,
        /// Run in this process instead of detaching.
        #[arg(long)]
        foreground: bool,
    },
    Stop,
    Status {
        #[arg(long)]
        json: bool,
    },
    Logs {
        #[arg(short, long)]
        follow: bool,
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = env::current_dir().context("resolve current directory")?;
    let paths = HivePaths::new(&root);
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Plan {
            goal,
            show,
            approve,
        } => cmd_plan(&paths, goal.as_deref(), show, approve),
        Command::Work(args) => cmd_work(&paths, &args),
        Command::Status { json } => cmd_status(&paths, json),
        Command::Merge {
            identifier,
            cleanup_only,
            force,
        } => cmd_merge(
            &paths,
            &identifier,
            AssistOptions {
                cleanup_only,
                force,
            },
        ),
        Command::Sync {
            push,
            pull,
            dry_run,
        } => cmd_sync(&paths, SyncOptions {
            push,
            pull,
            dry_run,
        }),
        Command::Task(cmd) => {
            let cfg = load_config(&paths.config_path)?;
            passthrough(&cfg.tracker.command, &cmd.into())
        }
        Command::Daemon(cmd) => cmd_daemon(&paths, cmd),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_hive(root, &InitOptions { force })?;
    println!("Initialized hive in {}", paths.hive_dir.display());
    println!();
    println!("Next steps:");
    println!("  hive plan \"<goal>\"   describe what you want built");
    println!("  bd create ...        add tasks to the tracker");
    println!("  hive work            start a worker");
    Ok(exit_codes::OK)
}

fn cmd_plan(paths: &HivePaths, goal: Option<&str>, show: bool, approve: bool) -> Result<i32> {
    paths.ensure_hive()?;
    if show {
        print!("{}", read_plan(&paths.plan_path)?);
        return Ok(exit_codes::OK);
    }
    if approve {
        match approve_plan(&paths.plan_path)? {
            ApproveOutcome::Approved => println!("Plan approved"),
            ApproveOutcome::AlreadyApproved => println!("Plan is already approved"),
        }
        return Ok(exit_codes::OK);
    }
    let goal = goal
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| anyhow!("provide a GOAL, --show or --approve"))?;
    create_plan(&paths.plan_path, goal)?;
    println!("Plan written to {}", paths.plan_path.display());
    Ok(exit_codes::OK)
}

fn cmd_work(paths: &HivePaths, args: &WorkArgs) -> Result<i32> {
    let cfg = paths.preflight()?;
    let parallel = args.parallel.unwrap_or(cfg.workers.max_parallel_workers);
    if parallel == 0 {
        return Err(anyhow!("--parallel must be at least 1"));
    }
    let overrides = args.overrides();

    if parallel > 1 {
        let exe = env::current_exe().context("locate hive executable")?;
        let report = run_pool(&exe, &paths.root, parallel, &overrides)?;
        for failed in report.failed() {
            eprintln!("{} exited with {:?}", failed.worker_id, failed.code);
        }
        return Ok(if report.all_succeeded() {
            exit_codes::OK
        } else {
            exit_codes::WORKER_FAILED
        });
    }

    let worker_id = args
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));
    let runner = SystemRunner::default();
    let default_branch = resolve_default_branch(&cfg, &Git::new(runner, &paths.root));
    let settings = LoopSettings::from_config(worker_id, &cfg, default_branch, &overrides);
    let ralph = RalphLoop::new(runner, SystemClock, paths, settings);
    let processed = ralph.run(|_| {});
    println!("{}: {processed} task(s) processed", ralph.settings().worker_id);
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &HivePaths, json: bool) -> Result<i32> {
    if !paths.workers_path.exists() {
        return Err(anyhow!(
            "hive not initialized ({} not found); run `hive init` first",
            paths.workers_path.display()
        ));
    }
    let cfg = load_config(&paths.config_path)?;
    let tracker = Tracker::new(SystemRunner::default(), cfg.tracker.command.clone());
    let report = collect_status(&paths.registry(), &tracker)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(exit_codes::OK)
}

fn workspace_manager(paths: &HivePaths, cfg: &HiveConfig) -> WorkspaceManager<SystemRunner> {
    WorkspaceManager::new(SystemRunner::default(), &paths.root, &cfg.worktrees.base_dir)
}

fn cmd_merge(paths: &HivePaths, identifier: &str, options: AssistOptions) -> Result<i32> {
    paths.ensure_hive()?;
    let cfg = load_config(&paths.config_path)?;
    let manager = workspace_manager(paths, &cfg);

    let Some(workspace) = locate_workspace(&manager, identifier)? else {
        eprintln!("Could not find a workspace for: {identifier}");
        eprintln!();
        eprintln!("Available workspaces:");
        for path in available_workspaces(&manager) {
            eprintln!("  - {}", path.display());
        }
        return Ok(exit_codes::INVALID);
    };
    println!("Workspace: {}", workspace.path.display());
    println!("Branch:    {}", workspace.branch);
    println!("Task:      {}", workspace.task_id);
    println!();

    let inspection = inspect_workspace(&manager.git().at(&workspace.path))?;
    let default_branch = resolve_default_branch(&cfg, manager.git());
    let outcome = MergeAssist::new(&manager, &default_branch, &paths.merge_lock_path).run(
        &workspace,
        &inspection,
        options,
    )?;
    print_assist_outcome(&outcome, &workspace, &default_branch, &cfg.tracker.command);
    Ok(outcome.exit_code())
}

fn print_assist_outcome(
    outcome: &AssistOutcome,
    ws: &LocatedWorkspace,
    default_branch: &str,
    tracker: &str,
) {
    let rerun = format!("hive merge {}", ws.task_id);
    match outcome {
        AssistOutcome::CleanedUp => {
            println!("Workspace and branch removed.");
            println!("Remember to close the task: {tracker} close {}", ws.task_id);
        }
        AssistOutcome::DirtyRefused => {
            println!("Workspace has uncommitted changes; use --force to clean up anyway.");
            println!("  cd {}", ws.path.display());
            println!("  git status");
        }
        AssistOutcome::NeedsResolution { conflicted } => {
            println!("Merge conflicts remain:");
            for file in conflicted {
                println!("  - {file}");
            }
            println!();
            println!("Resolve them, then run `{rerun}` again:");
            println!("  cd {}", ws.path.display());
            println!("  git add <resolved-files> && git commit");
        }
        AssistOutcome::Uncommitted => {
            println!("Workspace has uncommitted changes. Commit or discard them, then run `{rerun}` again:");
            println!("  cd {}", ws.path.display());
            println!("  git status");
        }
        AssistOutcome::CheckoutFailed(detail) => {
            println!("Could not check out {default_branch}: {detail}");
        }
        AssistOutcome::MergeFailed(detail) => {
            println!("Merging {} into {default_branch} failed:", ws.branch);
            println!("{detail}");
            println!();
            println!("Resolve the conflicts in the main checkout and commit, or run `git merge --abort`.");
            println!("Then clean up with `{rerun} --cleanup-only`.");
        }
        AssistOutcome::Merged { workspace_removed } => {
            println!("Merged {} into {default_branch}.", ws.branch);
            if !workspace_removed {
                println!(
                    "Warning: the workspace could not be removed; run `git worktree remove --force {}`",
                    ws.path.display()
                );
            }
            println!("Remember to close the task: {tracker} close {}", ws.task_id);
        }
    }
}

fn cmd_sync(paths: &HivePaths, options: SyncOptions) -> Result<i32> {
    paths.ensure_hive()?;
    let cfg = load_config(&paths.config_path)?;
    let manager = workspace_manager(paths, &cfg);
    let branches = task_branches(&manager)?;
    if branches.is_empty() {
        println!("No task branches found");
        return Ok(exit_codes::OK);
    }
    println!("Found {} task branch(es):", branches.len());
    for tb in &branches {
        println!("  - {}", tb.branch);
    }
    println!();

    for result in sync_branches(&manager, &branches, options) {
        let verb = match result.action {
            SyncAction::Push => "push",
            SyncAction::Pull => "pull",
        };
        match result.ok {
            None => println!("  would {verb}: {}", result.branch),
            Some(true) => println!("  {verb} ok: {}", result.branch),
            Some(false) => println!("  {verb} failed: {} {}", result.branch, result.detail),
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_daemon(paths: &HivePaths, cmd: DaemonCmd) -> Result<i32> {
    paths.ensure_hive()?;
    let cfg = load_config(&paths.config_path)?;
    match cmd {
        DaemonCmd::Start {
            check_interval,
            stuck_threshold,
            notify,
            foreground,
        } => {
            let mut settings = MonitorSettings::from_config(&cfg.daemon);
            if let Some(secs) = check_interval {
                settings.check_interval = Duration::from_secs(secs.max(1));
            }
            if let Some(secs) = stuck_threshold {
                settings.stuck_threshold = Duration::from_secs(secs);
            }
            settings.notify |= notify;

            if foreground {
                let monitor = Monitor::new(
                    paths.registry(),
                    settings,
                    SystemRunner::default(),
                    SystemClock,
                );
                run_foreground(paths, &monitor, None)?;
            } else {
                let exe = env::current_exe().context("locate hive executable")?;
                let pid = spawn_background(&exe, paths, &settings)?;
                println!("Daemon started (pid {pid})");
                println!("Logs: {}", paths.daemon_log_path.display());
            }
            Ok(exit_codes::OK)
        }
        DaemonCmd::Stop => {
            let pid = PidFile::new(&paths.daemon_pid_path).terminate()?;
            println!("Daemon stopped (pid {pid})");
            Ok(exit_codes::OK)
        }
        DaemonCmd::Status { json } => {
            let status = daemon_status(paths, Duration::from_secs(cfg.daemon.stuck_threshold))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(exit_codes::OK);
            }
            match status.pid {
                Some(pid) => println!("Daemon running (pid {pid})"),
                None => println!("Daemon not running"),
            }
            for stuck in &status.stuck_workers {
                println!(
                    "  {} stuck on {} for {}s (session {})",
                    stuck.worker_id, stuck.task_id, stuck.stuck_seconds, stuck.tmux_session
                );
            }
            Ok(exit_codes::OK)
        }
        DaemonCmd::Logs { follow, lines } => {
            let log = &paths.daemon_log_path;
            if !log.exists() {
                return Err(anyhow!("no daemon log at {}", log.display()));
            }
            for line in tail_lines(log, lines)? {
                println!("{line}");
            }
            if follow {
                let offset = fs::metadata(log)?.len();
                follow_log(log, offset, &mut io::stdout(), &SystemClock, || true)?;
            }
            Ok(exit_codes::OK)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn work_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "hive",
            "work",
            "--parallel",
            "3",
            "--task-timeout",
            "900",
            "--agent-command",
            "claude",
        ])
        .expect("parse");
        let Command::Work(args) = cli.command else {
            panic!("expected work");
        };
        assert_eq!(args.parallel, Some(3));
        let overrides = args.overrides();
        assert_eq!(overrides.task_timeout, Some(900));
        assert_eq!(overrides.agent_command.as_deref(), Some("claude"));
        assert_eq!(overrides.poll_interval, None);
    }

    #[test]
    fn zero_poll_interval_and_timeout_are_rejected() {
        for flag in ["--poll-interval", "--task-timeout"] {
            assert!(Cli::try_parse_from(["hive", "work", flag, "0"]).is_err(), "{flag}");
            assert!(Cli::try_parse_from(["hive", "work", flag, "1"]).is_ok(), "{flag}");
        }
        let cli = Cli::try_parse_from(["hive", "work", "--spawn-grace", "0"]).expect("parse");
        let Command::Work(args) = cli.command else {
            panic!("expected work");
        };
        assert_eq!(args.spawn_grace, Some(0));
    }

    #[test]
    fn task_add_defaults_and_priority_range() {
        let cli = Cli::try_parse_from(["hive", "task", "add", "Fix the parser"]).expect("parse");
        let Command::Task(cmd) = cli.command else {
            panic!("expected task");
        };
        assert_eq!(
            TaskCommand::from(cmd),
            TaskCommand::Add {
                description: "Fix the parser".to_string(),
                priority: 2,
                task_type: "task".to_string(),
                discovered_from: None,
            }
        );
        assert!(Cli::try_parse_from(["hive", "task", "add", "x", "--priority", "9"]).is_err());
    }

    #[test]
    fn daemon_logs_defaults_to_twenty_lines() {
        let cli = Cli::try_parse_from(["hive", "daemon", "logs", "-f"]).expect("parse");
        let Command::Daemon(DaemonCmd::Logs { follow, lines }) = cli.command else {
            panic!("expected daemon logs");
        };
        assert!(follow);
        assert_eq!(lines, 20);
    }
}
