//! Mount session manager and POSIX translation layer for oxvfs containers.
//!
//! # Components
//!
//! - [`validate`]: credential and container path checks, run before any
//!   engine call
//! - [`error`]: [`VfsError`] and [`check`], the single translation point for
//!   engine result codes
//! - [`session`]: [`VirtualFileSystem`], the mount/unmount state machine
//! - [`posix`]: path-based file operations on a mounted session
//! - [`file`]: [`VfsFile`], `std::io` streams over the POSIX layer
//!
//! # Example
//!
//! ```no_run
//! use nix::fcntl::OFlag;
//! use oxvfs_core::ContainerEngine;
//! use oxvfs_mount::{Credential, VirtualFileSystem};
//!
//! # fn main() -> Result<(), oxvfs_mount::VfsError> {
//! let vfs = VirtualFileSystem::with_container_path(ContainerEngine::new(), "/tmp/notes.db")?;
//! vfs.create_new_container(&Credential::Password("secret"))?;
//! vfs.mount(&Credential::Password("secret"))?;
//!
//! let handle = vfs.open("/hello.txt", OFlag::O_CREAT | OFlag::O_WRONLY, 0o600)?;
//! vfs.pwrite(&handle, b"hello", 0)?;
//!
//! vfs.unmount()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]

pub mod error;
pub mod file;
pub mod posix;
pub mod session;
pub mod validate;

pub use error::{ErrorSlot, VfsError, VfsResult, check, strerror};
pub use file::{OpenOptions, VfsFile};
pub use posix::{PathHandle, StatFs};
pub use session::{MountState, VirtualFileSystem};
pub use validate::Credential;

/// Testing utilities: a recording fake engine, temporary containers and
/// error assertions.
pub mod testing;
