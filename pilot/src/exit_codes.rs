//! Stable exit codes for pilot CLI commands.

/// Command succeeded; for `pilot run`, the task completed.
pub const OK: i32 = 0;
/// Invalid setup: missing or bad config, prompt override or plan.
pub const INVALID: i32 = 1;
/// `pilot run` started a task and it failed.
pub const FAILED: i32 = 2;
