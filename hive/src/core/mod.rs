//! Pure orchestration rules (no I/O).

pub mod liveness;
pub mod naming;
pub mod porcelain;
pub mod readiness;
pub mod types;
