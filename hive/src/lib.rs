//! Ralph-loop orchestrator for autonomous coding agents.
//!
//! Workers repeatedly pull the next ready task from an external tracker,
//! give it an isolated git worktree and a tmux session running the agent,
//! supervise it to a terminal outcome and merge or discard the result.
//!
//! - **[`core`]**: Pure rules (readiness, naming, liveness, parsing). No I/O.
//! - **[`io`]**: Adapters for processes, git, tmux, the tracker and `.hive/` files.
//!
//! Orchestration modules ([`ralph`], [`pool`], [`daemon`], [`status`],
//! [`merge`], [`task`]) compose the two into CLI commands.

pub mod core;
pub mod daemon;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod merge;
pub mod pool;
pub mod ralph;
pub mod status;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
