//! Process exit codes

pub const SUCCESS: i32 = 0;
/// Runtime failure, or a gallery that stalled or was cancelled
pub const ERROR: i32 = 1;
/// Gallery unknown to the metadata service, or nothing cached for it
pub const NOT_FOUND: i32 = 2;
/// Malformed gallery id or conflicting arguments
pub const INVALID_INPUT: i32 = 3;
/// Waiting was interrupted with Ctrl+C
pub const INTERRUPTED: i32 = 130;
