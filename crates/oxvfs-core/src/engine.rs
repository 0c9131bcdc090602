//! The storage engine call surface.
//!
//! Everything above this trait speaks in paths and POSIX semantics; everything
//! below it owns the container format. Results follow the FUSE convention used
//! by path-based engines: `>= 0` is success, a negative value is `-errno`.
//! Callers are expected to funnel these codes through a single translation
//! point rather than interpreting the sign themselves.

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length in bytes of a raw container key.
pub const REQUIRED_KEY_LENGTH: usize = 32;

/// Page size the engine reports as its block size.
pub const ENGINE_PAGE_SIZE: u64 = 4096;

/// Largest file the engine will hold. Writes or truncates past it fail with
/// `EFBIG`.
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// An explicit engine handle returned by a successful credential open.
///
/// Handle ID 0 is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineHandle(u64);

impl EngineHandle {
    /// Wrap a raw handle ID.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The raw handle ID.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// File attributes, laid out like `struct stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    /// File type bits (`S_IFMT`) plus permission bits.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub blksize: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
}

impl Default for FileStat {
    fn default() -> Self {
        Self {
            dev: 0,
            ino: 0,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            blksize: ENGINE_PAGE_SIZE,
            blocks: 0,
        }
    }
}

impl FileStat {
    /// Whether the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    /// Whether the mode describes a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    /// Whether the mode describes a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// A path-keyed, credential-gated encrypted storage engine.
///
/// There is no per-open-file state: every call names its path. Opening the
/// container with a credential yields an explicit handle; in addition the
/// engine keeps one implicit handle per operating thread, and
/// [`instance_count`](StorageEngine::instance_count) reports both.
pub trait StorageEngine: Send + Sync {
    /// Open (or materialize) the container with a password.
    fn open_with_password(&self, container: &Path, password: &str) -> Option<EngineHandle>;

    /// Open (or materialize) the container with a raw key.
    fn open_with_key(&self, container: &Path, key: &[u8]) -> Option<EngineHandle>;

    /// Release an explicit handle. Releasing the last one finalizes the
    /// container and discards key material.
    fn close(&self, handle: EngineHandle);

    /// Number of engine handles currently open, explicit and implicit.
    fn instance_count(&self) -> usize;

    fn create(&self, path: &str, mode: u32) -> i32;
    fn open(&self, path: &str, flags: i32) -> i32;

    /// Read at `offset`. Returns the byte count, or `-EIO` once `offset` is
    /// at or past the end of the file.
    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> isize;
    fn write(&self, path: &str, buf: &[u8], offset: u64) -> isize;
    fn truncate(&self, path: &str, length: u64) -> i32;
    fn fsync(&self, path: &str) -> i32;
    fn mkdir(&self, path: &str, mode: u32) -> i32;
    fn rmdir(&self, path: &str) -> i32;
    fn unlink(&self, path: &str) -> i32;
    fn rename(&self, from: &str, to: &str) -> i32;
    fn link(&self, from: &str, to: &str) -> i32;
    fn symlink(&self, target: &str, link: &str) -> i32;
    fn getattr(&self, path: &str, stat: &mut FileStat) -> i32;
    fn access(&self, path: &str, mode: i32) -> i32;
    fn chmod(&self, path: &str, mode: u32) -> i32;

    /// Set access and modification times; `None` leaves a time unchanged.
    fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> i32;

    fn is_dir(&self, path: &str) -> bool;

    /// Feed every entry name of a directory, `.` and `..` included, to `filler`.
    fn readdir(&self, path: &str, filler: &mut dyn FnMut(&str)) -> i32;

    fn begin_transaction(&self) -> i32;
    fn complete_transaction(&self, commit: bool) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stat_type_bits() {
        let stat = FileStat {
            mode: libc::S_IFDIR as u32 | 0o755,
            ..FileStat::default()
        };
        assert!(stat.is_dir());
        assert!(!stat.is_file());
        assert_eq!(stat.permissions(), 0o755);

        let stat = FileStat {
            mode: libc::S_IFREG as u32 | 0o600,
            ..FileStat::default()
        };
        assert!(stat.is_file());
        assert!(!stat.is_symlink());
    }

    #[test]
    fn test_engine_handle_display() {
        assert_eq!(EngineHandle::from_raw(7).to_string(), "#7");
        assert_eq!(EngineHandle::from_raw(7).as_raw(), 7);
    }
}
