//! Stable exit codes for conductor CLI commands.

/// Command succeeded; `run` reached a definite outcome.
pub const OK: i32 = 0;
/// Setup error: missing workspace, malformed goal file or invalid config.
pub const SETUP_ERROR: i32 = 1;
