//! Process exit codes.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Wrong password or key.
pub const AUTH_FAILED: u8 = 2;
/// Missing container or missing path inside it.
pub const NOT_FOUND: u8 = 3;
