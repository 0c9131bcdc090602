//! Testing utilities for session and POSIX-layer tests.
//!
//! - [`RecordingEngine`]: scripted fake engine that records every call, for
//!   proving what does and does not reach the engine
//! - [`TempContainer`]: a real container in a temporary directory
//! - Assertions on [`VfsError`](crate::VfsError) kinds and byte content
//!
//! # Usage
//!
//! ```ignore
//! use oxvfs_mount::testing::{TempContainer, assert_bytes_equal};
//!
//! #[test]
//! fn test_roundtrip() {
//!     let container = TempContainer::new();
//!     let vfs = container.mounted();
//!     // ... write and read back ...
//! }
//! ```

pub mod assertions;
pub mod container;
pub mod engine;

pub use assertions::{assert_bytes_equal, assert_errno, assert_illegal_state, assert_invalid_argument};
pub use container::{TEST_PASSWORD, TempContainer};
pub use engine::RecordingEngine;
