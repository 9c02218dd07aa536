//! Parsers for git's machine-readable output.

use std::path::PathBuf;

use anyhow::{Result, anyhow};

use crate::core::types::WorkspaceInfo;

/// Parse `git worktree list --porcelain`.
///
/// Records are blank-line separated; each starts with `worktree <path>`.
/// Unknown attribute lines (`locked`, `prunable`, ...) are ignored.
pub fn parse_worktree_list(output: &str) -> Vec<WorkspaceInfo> {
    let mut entries = Vec::new();
    let mut current: Option<WorkspaceInfo> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorkspaceInfo {
                path: PathBuf::from(path),
                ..WorkspaceInfo::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "detached" {
            entry.detached = true;
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    /// Unmerged entries left behind by a conflicting merge.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.code.as_str(),
            "UU" | "AA" | "DD" | "AU" | "UA" | "DU" | "UD"
        )
    }
}

pub fn parse_status(output: &str) -> Result<Vec<StatusEntry>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_status_line)
        .collect()
}

pub fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(2) || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once(" -> ") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
