//! Assertions for session and POSIX-layer tests.
//!
//! Failures print errno names and byte offsets rather than dumping whole
//! buffers or error chains.

use std::fmt::Debug;

use nix::errno::Errno;

use crate::error::VfsError;

/// Assert that two byte slices are equal, reporting the first difference.
pub fn assert_bytes_equal(actual: &[u8], expected: &[u8], context: &str) {
    if actual.len() != expected.len() {
        panic!(
            "{context}: size mismatch - expected {} bytes, got {} bytes",
            expected.len(),
            actual.len()
        );
    }
    if let Some((i, (a, e))) = actual
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (a, e))| a != e)
    {
        panic!("{context}: content mismatch at byte {i} - expected 0x{e:02x}, got 0x{a:02x}");
    }
}

/// Assert that `result` failed with an errno error carrying `expected`.
pub fn assert_errno<T: Debug>(result: Result<T, VfsError>, expected: Errno, context: &str) {
    match result {
        Ok(value) => panic!("{context}: expected {expected:?} but got success with {value:?}"),
        Err(VfsError::Errno { errno, .. }) if errno == expected => {}
        Err(err) => panic!("{context}: expected {expected:?}, got {err}"),
    }
}

/// Assert that `result` failed because of the session state.
pub fn assert_illegal_state<T: Debug>(result: Result<T, VfsError>, context: &str) {
    match result {
        Err(VfsError::IllegalState { .. }) => {}
        other => panic!("{context}: expected IllegalState, got {other:?}"),
    }
}

/// Assert that `result` failed validation, returning the message.
pub fn assert_invalid_argument<T: Debug>(result: Result<T, VfsError>, context: &str) -> String {
    match result {
        Err(VfsError::InvalidArgument { message }) => message,
        other => panic!("{context}: expected InvalidArgument, got {other:?}"),
    }
}
