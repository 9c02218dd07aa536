//! Side-effecting adapters: processes, git, tmux, the tracker and `.hive/` files.

pub mod clock;
pub mod config;
pub mod context;
pub mod git;
pub mod init;
pub mod lock;
pub mod pidfile;
pub mod plan;
pub mod process;
pub mod registry;
pub mod session;
pub mod store;
pub mod tracker;
pub mod workspace;
