//! `hive task`: thin pass-through to the tracker CLI.

use std::io::ErrorKind;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

const DISCOVERED_NOTE: &str = "Created via hive task add (discovered work)";

/// One tracker operation exposed through `hive task`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    List {
        status: Option<String>,
        json: bool,
    },
    Show {
        id: String,
        json: bool,
    },
    Add {
        description: String,
        priority: u8,
        task_type: String,
        discovered_from: Option<String>,
    },
    TooBig {
        id: String,
    },
}

impl TaskCommand {
    /// Tracker arguments for this operation.
    pub fn tracker_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            TaskCommand::List { status, json } => {
                args.push("list".into());
                if let Some(status) = status {
                    args.extend(["--status".into(), status.clone()]);
                }
                if *json {
                    args.push("--json".into());
                }
            }
            TaskCommand::Show { id, json } => {
                args.extend(["show".into(), id.clone()]);
                if *json {
                    args.push("--json".into());
                }
            }
            TaskCommand::Add {
                description,
                priority,
                task_type,
                discovered_from,
            } => {
                args.extend([
                    "create".into(),
                    "--title".into(),
                    description.clone(),
                    "--type".into(),
                    task_type.clone(),
                    "--priority".into(),
                    priority.to_string(),
                    "--notes".into(),
                    DISCOVERED_NOTE.into(),
                ]);
                if let Some(parent) = discovered_from {
                    args.extend(["--deps".into(), format!("discovered-from:{parent}")]);
                }
            }
            TaskCommand::TooBig { id } => {
                args.extend([
                    "update".into(),
                    id.clone(),
                    "--status".into(),
                    "too_big".into(),
                ]);
            }
        }
        args
    }
}

/// Run the tracker with inherited stdio and return its exit code.
pub fn passthrough(program: &str, command: &TaskCommand) -> Result<i32> {
    let args = command.tracker_args();
    debug!(program, args = ?args, "running tracker");
    let status = match Command::new(program).args(&args).status() {
        Ok(status) => status,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(anyhow!(
                "tracker `{program}` not found in PATH; install beads first"
            ));
        }
        Err(err) => return Err(err).with_context(|| format!("run {program}")),
    };
    Ok(status.code().unwrap_or(crate::exit_codes::INVALID))
}
