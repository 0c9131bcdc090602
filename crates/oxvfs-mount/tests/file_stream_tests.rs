//! `VfsFile` streams over a mounted container.

use std::io::{self, Read, Seek, SeekFrom, Write};

use nix::errno::Errno;
use oxvfs_mount::testing::{TempContainer, assert_bytes_equal, assert_errno};
use oxvfs_mount::{OpenOptions, VfsFile};

#[test]
fn test_write_then_read_to_end() {
    let container = TempContainer::new();
    let vfs = container.mounted();

    let mut file = VfsFile::create(&vfs, "/doc.txt").unwrap();
    file.write_all(b"line one\nline two\n").unwrap();
    file.close().unwrap();

    let mut file = VfsFile::open(&vfs, "/doc.txt").unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    assert_eq!(text, "line one\nline two\n");
}

#[test]
fn test_create_uses_owner_only_mode() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let file = VfsFile::create(&vfs, "/private").unwrap();
    assert_eq!(file.metadata().unwrap().permissions(), 0o600);
}

#[test]
fn test_reopen_keeps_existing_permissions() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    drop(VfsFile::create(&vfs, "/shared").unwrap());
    vfs.chmod("/shared", 0o644).unwrap();

    let file = VfsFile::create(&vfs, "/shared").unwrap();
    assert_eq!(file.metadata().unwrap().permissions(), 0o644);
    let file = VfsFile::open(&vfs, "/shared").unwrap();
    assert_eq!(file.metadata().unwrap().permissions(), 0o644);
}

#[test]
fn test_opening_directory_is_eisdir() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    vfs.mkdir("/dir", 0o755).unwrap();

    assert_errno(VfsFile::open(&vfs, "/dir"), Errno::EISDIR, "read-open directory");
    assert_errno(VfsFile::create(&vfs, "/dir"), Errno::EISDIR, "write-open directory");
}

#[test]
fn test_open_missing_file() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    assert_errno(VfsFile::open(&vfs, "/nope"), Errno::ENOENT, "open missing");
}

#[test]
fn test_create_new_refuses_existing() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    drop(VfsFile::create(&vfs, "/once").unwrap());

    let result = OpenOptions::new().write(true).create_new(true).open(&vfs, "/once");
    assert_errno(result, Errno::EEXIST, "create_new over existing");
}

#[test]
fn test_append_writes_at_end() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let mut file = VfsFile::create(&vfs, "/log").unwrap();
    file.write_all(b"first;").unwrap();
    file.close().unwrap();

    let mut file = OpenOptions::new().append(true).open(&vfs, "/log").unwrap();
    file.write_all(b"second;").unwrap();
    file.close().unwrap();

    let mut content = Vec::new();
    VfsFile::open(&vfs, "/log").unwrap().read_to_end(&mut content).unwrap();
    assert_bytes_equal(&content, b"first;second;", "appended log");
}

#[test]
fn test_seek_and_overwrite() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&vfs, "/data")
        .unwrap();
    file.write_all(b"hello world").unwrap();

    assert_eq!(file.seek(SeekFrom::Start(6)).unwrap(), 6);
    file.write_all(b"WORLD").unwrap();
    assert_eq!(file.seek(SeekFrom::End(-5)).unwrap(), 6);
    assert_eq!(file.seek(SeekFrom::Current(-6)).unwrap(), 0);

    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    assert_eq!(content, "hello WORLD");

    let err = file.seek(SeekFrom::Current(-100)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[test]
fn test_set_len_and_sync() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let mut file = VfsFile::create(&vfs, "/sized").unwrap();
    file.write_all(b"0123456789").unwrap();
    file.set_len(3).unwrap();
    file.sync_all().unwrap();
    assert_eq!(file.metadata().unwrap().size, 3);
}

#[test]
fn test_closed_file_is_ebadf() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let mut file = VfsFile::create(&vfs, "/closed").unwrap();
    file.close().unwrap();
    file.close().unwrap();

    let err = file.write(b"late").unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn test_errors_convert_to_io_errors() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let mut file = VfsFile::create(&vfs, "/vanishing").unwrap();
    vfs.unlink("/vanishing").unwrap();

    let err = file.write(b"x").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}
