//! Stable exit codes for `statewatch` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, catalog or fixtures.
pub const INVALID: i32 = 1;
/// The scheduler could not be started or failed while running.
pub const FATAL: i32 = 2;
