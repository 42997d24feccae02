//! Stable exit codes for conductor CLI commands.

/// Command succeeded; for `decide`, the action is allowed.
pub const OK: i32 = 0;
/// Invalid input, config or state, or any other error.
pub const INVALID: i32 = 1;
/// `conductor decide` denied the action.
pub const DENY: i32 = 2;
/// `conductor outcome` reported a task blocked on a human decision.
pub const BLOCKED: i32 = 3;
