//! Plan document (`.hive/plan.md`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use minijinja::{Environment, context};

/// Placeholder written by `hive init`.
pub const DRAFT_PLAN: &str = include_str!("templates/draft_plan.md");
const PLAN_TEMPLATE: &str = include_str!("templates/plan.md");

const APPROVED: &str = "> **Status:** Approved";
const APPROVABLE: [&str; 2] = ["> **Status:** Draft", "> **Status:** In Progress"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveOutcome {
    Approved,
    AlreadyApproved,
}

/// Render a plan for `goal`.
pub fn render_plan(goal: &str, created: DateTime<Local>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("plan.md", PLAN_TEMPLATE)
        .context("load plan template")?;
    let mut rendered = env.get_template("plan.md")?.render(context! {
        goal => goal.trim(),
        created => created.format("%Y-%m-%d %H:%M:%S").to_string(),
    })?;
    rendered.push('\n');
    Ok(rendered)
}

/// Write a new plan for `goal`, replacing any existing one.
pub fn create_plan(path: &Path, goal: &str) -> Result<()> {
    let plan = render_plan(goal, Local::now())?;
    fs::write(path, plan).with_context(|| format!("write {}", path.display()))
}

pub fn read_plan(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(anyhow!(
            "no plan found; create one with: hive plan \"<goal>\""
        ));
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Plan text to embed into agent context, if a plan exists.
pub fn plan_for_context(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .filter(|text| !text.trim().is_empty())
}

/// Mark the plan approved.
pub fn approve_plan(path: &Path) -> Result<ApproveOutcome> {
    let content = read_plan(path)?;
    if content.contains(APPROVED) {
        return Ok(ApproveOutcome::AlreadyApproved);
    }
    let updated = APPROVABLE
        .iter()
        .fold(content, |text, status| text.replace(status, APPROVED));
    fs::write(path, updated).with_context(|| format!("write {}", path.display()))?;
    Ok(ApproveOutcome::Approved)
}
