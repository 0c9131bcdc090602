//! POSIX-style operations over a mounted session.
//!
//! Every operation enters the session (failing with `IllegalState` when
//! nothing is mounted), calls the engine by path and routes the engine's
//! result through [`check`](crate::error::check).

use std::os::unix::fs::MetadataExt;
use std::time::SystemTime;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::statvfs::statvfs;
use nix::unistd::AccessFlags;
use oxvfs_core::{ENGINE_PAGE_SIZE, FileStat, StorageEngine};
use tracing::{instrument, trace, warn};

use crate::error::{ErrorSlot, VfsError, VfsResult, check};
use crate::session::{Mounted, VirtualFileSystem};

/// Stand-in for a file descriptor: the path it was opened by.
///
/// The engine keeps no per-open state, so a handle is just a path plus a
/// validity flag. Operations re-resolve the path on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHandle {
    path: String,
    valid: bool,
}

impl PathHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            valid: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// False once closed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Filesystem statistics, laid out like `struct statvfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatFs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: u64,
}

fn getattr<E: StorageEngine>(session: &Mounted<'_, E>, operation: &'static str, path: &str) -> VfsResult<FileStat> {
    let mut stat = FileStat::default();
    check(operation, session.engine().getattr(path, &mut stat))?;
    Ok(stat)
}

impl<E: StorageEngine> VirtualFileSystem<E> {
    /// Open `path`, creating it according to `flags`, then apply `mode`.
    ///
    /// `O_CREAT | O_EXCL` creates and fails if the path exists. `O_CREAT`
    /// alone creates only when the path is absent. A failed `chmod` is logged
    /// and the open still succeeds, since the file may already exist.
    #[instrument(level = "debug", skip(self))]
    pub fn open(&self, path: &str, flags: OFlag, mode: u32) -> VfsResult<PathHandle> {
        let session = self.mounted("open")?;
        let engine = session.engine();
        let mut slot = ErrorSlot::new();

        if flags.contains(OFlag::O_CREAT | OFlag::O_EXCL) {
            slot.check("open", engine.create(path, mode))?;
        } else if flags.contains(OFlag::O_CREAT) {
            match check("access", engine.access(path, libc::F_OK)) {
                Err(e) if e.is_errno(Errno::ENOENT) => {
                    slot.check("open", engine.create(path, mode))?;
                }
                Err(e) => {
                    slot.set_pending(e);
                    slot.check("open", engine.open(path, flags.bits()))?;
                }
                Ok(_) => {
                    slot.check("open", engine.open(path, flags.bits()))?;
                }
            }
        } else {
            slot.check("open", engine.open(path, flags.bits()))?;
        }

        if let Err(e) = check("chmod", engine.chmod(path, mode)) {
            warn!(path, mode = %format_args!("{mode:o}"), error = %e, "Mode not applied on open");
        }
        Ok(PathHandle::new(path))
    }

    /// Invalidate `handle`. No engine call is made.
    pub fn close(&self, handle: &mut PathHandle) -> VfsResult<()> {
        let _session = self.mounted("close")?;
        handle.valid = false;
        Ok(())
    }

    /// Read at `file_offset`. Zero means end of data.
    pub fn pread(&self, handle: &PathHandle, buf: &mut [u8], file_offset: u64) -> VfsResult<usize> {
        let session = self.mounted("pread")?;
        let rc = session.engine().read(&handle.path, buf, file_offset);
        match check("pread", rc as i64) {
            Ok(n) => Ok(n as usize),
            // The engine signals end of data with EIO
            Err(e) if e.is_errno(Errno::EIO) => {
                trace!(path = %handle.path, file_offset, "End of data");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    pub fn pwrite(&self, handle: &PathHandle, buf: &[u8], file_offset: u64) -> VfsResult<usize> {
        let session = self.mounted("pwrite")?;
        let rc = session.engine().write(&handle.path, buf, file_offset);
        Ok(check("pwrite", rc as i64)? as usize)
    }

    pub fn fstat(&self, handle: &PathHandle) -> VfsResult<FileStat> {
        let session = self.mounted("fstat")?;
        getattr(&session, "fstat", &handle.path)
    }

    pub fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let session = self.mounted("stat")?;
        getattr(&session, "stat", path)
    }

    /// Symbolic-link metadata is not modeled.
    pub fn lstat(&self, _path: &str) -> VfsResult<FileStat> {
        let _session = self.mounted("lstat")?;
        Err(VfsError::NotImplemented { operation: "lstat" })
    }

    pub fn fsync(&self, handle: &PathHandle) -> VfsResult<()> {
        let session = self.mounted("fsync")?;
        check("fsync", session.engine().fsync(&handle.path))?;
        Ok(())
    }

    pub fn ftruncate(&self, handle: &PathHandle, length: u64) -> VfsResult<()> {
        let session = self.mounted("ftruncate")?;
        check("ftruncate", session.engine().truncate(&handle.path, length))?;
        Ok(())
    }

    pub fn truncate(&self, path: &str, length: u64) -> VfsResult<()> {
        let session = self.mounted("truncate")?;
        check("truncate", session.engine().truncate(path, length))?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> VfsResult<()> {
        let session = self.mounted("mkdir")?;
        check("mkdir", session.engine().mkdir(path, mode))?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> VfsResult<()> {
        let session = self.mounted("rmdir")?;
        check("rmdir", session.engine().rmdir(path))?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> VfsResult<()> {
        let session = self.mounted("unlink")?;
        check("unlink", session.engine().unlink(path))?;
        Ok(())
    }

    /// `rmdir` for directories, `unlink` for everything else.
    pub fn remove(&self, path: &str) -> VfsResult<()> {
        let session = self.mounted("remove")?;
        let engine = session.engine();
        if engine.is_dir(path) {
            check("rmdir", engine.rmdir(path))?;
        } else {
            check("unlink", engine.unlink(path))?;
        }
        Ok(())
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let session = self.mounted("rename")?;
        check("rename", session.engine().rename(old_path, new_path))?;
        Ok(())
    }

    pub fn link(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let session = self.mounted("link")?;
        check("link", session.engine().link(old_path, new_path))?;
        Ok(())
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> VfsResult<()> {
        let session = self.mounted("symlink")?;
        check("symlink", session.engine().symlink(target, link_path))?;
        Ok(())
    }

    /// Whether `path` is accessible with `mode`. Missing or forbidden paths
    /// are `false`; other failures are errors.
    pub fn access(&self, path: &str, mode: AccessFlags) -> VfsResult<bool> {
        let session = self.mounted("access")?;
        match check("access", session.engine().access(path, mode.bits())) {
            Ok(_) => Ok(true),
            Err(e) if e.is_errno(Errno::ENOENT) || e.is_errno(Errno::EACCES) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn chmod(&self, path: &str, mode: u32) -> VfsResult<()> {
        let session = self.mounted("chmod")?;
        check("chmod", session.engine().chmod(path, mode))?;
        Ok(())
    }

    /// Set times; `None` leaves that time unchanged.
    pub fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> VfsResult<()> {
        let session = self.mounted("utimens")?;
        check("utimens", session.engine().utimens(path, atime, mtime))?;
        Ok(())
    }

    /// Host statistics for the partition holding the container.
    ///
    /// `path` is ignored. The block size is reported as the engine page size
    /// and the block count is the container file's own allocation.
    pub fn statfs(&self, _path: &str) -> VfsResult<StatFs> {
        let session = self.mounted("statfs")?;
        let container = session
            .container_path()
            .ok_or_else(|| VfsError::illegal_state("no container path configured"))?;

        let host = statvfs(container).map_err(|errno| VfsError::errno("statfs", errno))?;
        let metadata = std::fs::metadata(container).map_err(|e| {
            VfsError::errno("statfs", Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)))
        })?;

        Ok(StatFs {
            bsize: ENGINE_PAGE_SIZE,
            frsize: host.fragment_size() as u64,
            blocks: metadata.blocks(),
            bfree: host.blocks_free() as u64,
            bavail: host.blocks_available() as u64,
            files: host.files() as u64,
            ffree: host.files_free() as u64,
            namelen: host.name_max() as u64,
        })
    }

    /// Entry names of a directory without `.` and `..`.
    pub fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        let session = self.mounted("list")?;
        let mut names = Vec::new();
        let rc = session.engine().readdir(path, &mut |name| {
            if name != "." && name != ".." {
                names.push(name.to_string());
            }
        });
        check("list", rc)?;
        Ok(names)
    }

    pub fn is_directory(&self, path: &str) -> VfsResult<bool> {
        let session = self.mounted("is_directory")?;
        Ok(session.engine().is_dir(path))
    }

    pub fn last_modified(&self, path: &str) -> VfsResult<SystemTime> {
        let session = self.mounted("last_modified")?;
        Ok(getattr(&session, "last_modified", path)?.mtime)
    }

    /// Set the modification time, keeping the access time.
    pub fn set_last_modified(&self, path: &str, mtime: SystemTime) -> VfsResult<()> {
        let session = self.mounted("set_last_modified")?;
        check("set_last_modified", session.engine().utimens(path, None, Some(mtime)))?;
        Ok(())
    }
}
