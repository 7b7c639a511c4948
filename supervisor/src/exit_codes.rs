//! Stable exit codes for `supervisor run`.

/// Every task is passed or failed.
pub const COMPLETE: i32 = 0;
/// Too many consecutive iterations completed nothing.
pub const STUCK: i32 = 1;
/// The iteration cap was reached with work remaining.
pub const MAX_ITERATIONS: i32 = 2;
/// Invalid config or task document, or an iteration failed.
pub const ERROR: i32 = 3;
