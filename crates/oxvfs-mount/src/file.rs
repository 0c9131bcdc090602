//! `std::io` streams over a mounted session.

use std::io::{self, Read, Seek, SeekFrom, Write};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use oxvfs_core::{FileStat, StorageEngine};

use crate::error::{VfsError, VfsResult};
use crate::posix::PathHandle;
use crate::session::VirtualFileSystem;

/// Permissions given to files created through [`OpenOptions`].
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Options for opening a [`VfsFile`], mirroring `std::fs::OpenOptions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    fn flags(&self) -> OFlag {
        let writable = self.write || self.append;
        let mut flags = match (self.read, writable) {
            (true, true) => OFlag::O_RDWR,
            (false, true) => OFlag::O_WRONLY,
            _ => OFlag::O_RDONLY,
        };
        if self.create_new {
            flags |= OFlag::O_CREAT | OFlag::O_EXCL;
        } else if self.create {
            flags |= OFlag::O_CREAT;
        }
        if self.truncate {
            flags |= OFlag::O_TRUNC;
        }
        flags
    }

    /// Open `path`. Directories are refused with `EISDIR`. An existing file
    /// keeps its permissions; a new one gets [`DEFAULT_FILE_MODE`].
    pub fn open<'a, E: StorageEngine>(
        &self,
        vfs: &'a VirtualFileSystem<E>,
        path: &str,
    ) -> VfsResult<VfsFile<'a, E>> {
        let mode = match vfs.stat(path) {
            Ok(stat) if stat.is_dir() => return Err(VfsError::errno("open", Errno::EISDIR)),
            Ok(stat) => stat.permissions(),
            Err(e) if e.is_errno(Errno::ENOENT) => DEFAULT_FILE_MODE,
            Err(e) => return Err(e),
        };
        let handle = vfs.open(path, self.flags(), mode)?;
        Ok(VfsFile {
            vfs,
            handle,
            position: 0,
            append: self.append,
            closed: false,
        })
    }
}

/// A file in a mounted container with a cursor, implementing
/// [`Read`], [`Write`] and [`Seek`].
#[derive(Debug)]
pub struct VfsFile<'a, E: StorageEngine> {
    vfs: &'a VirtualFileSystem<E>,
    handle: PathHandle,
    position: u64,
    append: bool,
    closed: bool,
}

impl<'a, E: StorageEngine> VfsFile<'a, E> {
    /// Open an existing file read-only.
    pub fn open(vfs: &'a VirtualFileSystem<E>, path: &str) -> VfsResult<Self> {
        OpenOptions::new().read(true).open(vfs, path)
    }

    /// Open a file for writing, creating it or truncating it.
    pub fn create(vfs: &'a VirtualFileSystem<E>, path: &str) -> VfsResult<Self> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(vfs, path)
    }

    pub fn path(&self) -> &str {
        self.handle.path()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        Ok(())
    }

    pub fn metadata(&self) -> io::Result<FileStat> {
        self.ensure_open()?;
        Ok(self.vfs.fstat(&self.handle)?)
    }

    pub fn set_len(&self, length: u64) -> io::Result<()> {
        self.ensure_open()?;
        Ok(self.vfs.ftruncate(&self.handle, length)?)
    }

    pub fn sync_all(&self) -> io::Result<()> {
        self.ensure_open()?;
        Ok(self.vfs.fsync(&self.handle)?)
    }

    /// Close the file. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.vfs.close(&mut self.handle)?;
        self.closed = true;
        Ok(())
    }
}

impl<E: StorageEngine> Read for VfsFile<'_, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = self.vfs.pread(&self.handle, buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<E: StorageEngine> Write for VfsFile<'_, E> {
    /// Writes the whole buffer; a short engine write is retried at the new
    /// offset.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if self.append {
            self.position = self.vfs.fstat(&self.handle)?.size;
        }
        let mut written = 0;
        while written < buf.len() {
            let n = self.vfs.pwrite(&self.handle, &buf[written..], self.position)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            written += n;
            self.position += n as u64;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

impl<E: StorageEngine> Seek for VfsFile<'_, E> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => (self.vfs.fstat(&self.handle)?.size, delta),
        };
        let position = base
            .checked_add_signed(delta)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"))?;
        self.position = position;
        Ok(position)
    }
}

impl<E: StorageEngine> Drop for VfsFile<'_, E> {
    fn drop(&mut self) {
        // Nothing to flush; failure here only means the session is gone
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(OpenOptions::new().read(true).flags(), OFlag::O_RDONLY);
        assert_eq!(
            OpenOptions::new().write(true).create(true).truncate(true).flags(),
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC
        );
        assert_eq!(
            OpenOptions::new().read(true).append(true).create_new(true).flags(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL
        );
    }
}
