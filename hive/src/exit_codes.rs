//! Stable exit codes for hive CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Preflight, configuration or command failure.
pub const INVALID: i32 = 1;
/// At least one pool worker exited unsuccessfully.
pub const WORKER_FAILED: i32 = 2;
