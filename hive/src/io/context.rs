//! Agent context file written into each workspace before the agent starts.
//!
//! The rendered document is the only channel through which the agent learns
//! what to do: task identity and description, how to report each outcome
//! back to the tracker, and the current plan.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::naming::branch_name;
use crate::core::types::TaskDetail;

const TASK_CONTEXT_TEMPLATE: &str = include_str!("templates/task_context.md");

/// Task fields as presented to the agent, with defaults filled in.
#[derive(Debug, Clone, Serialize)]
struct TaskView {
    id: String,
    title: String,
    task_type: String,
    description: String,
    acceptance_criteria: String,
}

impl TaskView {
    fn from_detail(detail: &TaskDetail) -> Self {
        let title = if detail.title.trim().is_empty() {
            "No title".to_string()
        } else {
            detail.title.trim().to_string()
        };
        let description = non_empty(detail.description.as_deref())
            .unwrap_or("No description provided")
            .to_string();
        let acceptance_criteria = non_empty(detail.acceptance_criteria.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Complete the implementation for: {title}"));
        Self {
            id: detail.id.clone(),
            task_type: non_empty(detail.task_type.as_deref())
                .unwrap_or("task")
                .to_string(),
            title,
            description,
            acceptance_criteria,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Inputs for [`render_agent_context`] beyond the task itself.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Tracker command the agent should use to report status.
    pub tracker_command: String,
    pub default_branch: String,
    /// File name of the context document inside the workspace.
    pub file_name: String,
}

pub fn render_agent_context(
    detail: &TaskDetail,
    plan: Option<&str>,
    settings: &ContextSettings,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("task_context.md", TASK_CONTEXT_TEMPLATE)
        .context("load task context template")?;
    let mut rendered = env.get_template("task_context.md")?.render(context! {
        task => TaskView::from_detail(detail),
        plan => non_empty(plan),
        tracker => settings.tracker_command.as_str(),
        default_branch => settings.default_branch.as_str(),
        branch => branch_name(&detail.id),
    })?;
    rendered.push('\n');
    Ok(rendered)
}

/// Render the context document and write it into `workspace`.
pub fn write_agent_context(
    workspace: &Path,
    detail: &TaskDetail,
    plan: Option<&str>,
    settings: &ContextSettings,
) -> Result<PathBuf> {
    let rendered = render_agent_context(detail, plan, settings)?;
    fs::create_dir_all(workspace)
        .with_context(|| format!("create directory {}", workspace.display()))?;
    let path = workspace.join(&settings.file_name);
    fs::write(&path, rendered).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), has_plan = plan.is_some(), "agent context written");
    Ok(path)
}
