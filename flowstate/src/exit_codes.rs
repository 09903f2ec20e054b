//! Stable exit codes for flowstate CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: invalid input, illegal transition, missing entity, corrupt or unreadable state.
pub const ERROR: i32 = 1;
/// `task next` found no eligible task.
pub const NO_TASK: i32 = 2;
/// `state archive` refused because the session is not complete.
pub const ARCHIVE_BLOCKED: i32 = 3;
/// `heal check` was rejected by an open breaker.
pub const BREAKER_OPEN: i32 = 4;
