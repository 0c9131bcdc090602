//! A scripted [`StorageEngine`] that records every call.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use oxvfs_core::{EngineHandle, FileStat, StorageEngine};
use parking_lot::Mutex;

/// Records calls as strings like `"create /f 644"` and returns scripted
/// results.
///
/// Every path operation succeeds with `0` unless a result is scripted with
/// [`set_result`](Self::set_result). Reads fill nothing and return `0`;
/// writes accept the whole buffer.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<String>>,
    results: DashMap<&'static str, i32>,
    directories: Mutex<HashSet<String>>,
    entries: Mutex<Vec<String>>,
    reject_credentials: AtomicBool,
    open_handles: AtomicUsize,
    extra_instances: AtomicUsize,
    next_handle: AtomicU64,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every later call of `operation` return `rc`.
    pub fn set_result(&self, operation: &'static str, rc: i32) {
        self.results.insert(operation, rc);
    }

    /// Make credential opens fail.
    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Pretend `count` other threads hold implicit handles.
    pub fn set_extra_instances(&self, count: usize) {
        self.extra_instances.store(count, Ordering::SeqCst);
    }

    /// Make `is_dir(path)` answer true.
    pub fn mark_directory(&self, path: &str) {
        self.directories.lock().insert(path.to_string());
    }

    /// Names `readdir` reports after `.` and `..`.
    pub fn set_entries(&self, names: &[&str]) {
        *self.entries.lock() = names.iter().map(ToString::to_string).collect();
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn result(&self, operation: &'static str) -> i32 {
        self.results.get(operation).map_or(0, |rc| *rc)
    }

    fn credential_open(&self, operation: &str) -> Option<EngineHandle> {
        self.record(operation.to_string());
        if self.reject_credentials.load(Ordering::SeqCst) {
            return None;
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Some(EngineHandle::from_raw(
            self.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }
}

impl StorageEngine for RecordingEngine {
    fn open_with_password(&self, _container: &Path, _password: &str) -> Option<EngineHandle> {
        self.credential_open("open_with_password")
    }

    fn open_with_key(&self, _container: &Path, _key: &[u8]) -> Option<EngineHandle> {
        self.credential_open("open_with_key")
    }

    fn close(&self, _handle: EngineHandle) {
        self.record("close".to_string());
        let _ = self
            .open_handles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn instance_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst) + self.extra_instances.load(Ordering::SeqCst)
    }

    fn create(&self, path: &str, mode: u32) -> i32 {
        self.record(format!("create {path} {mode:o}"));
        self.result("create")
    }

    fn open(&self, path: &str, _flags: i32) -> i32 {
        self.record(format!("open {path}"));
        self.result("open")
    }

    fn read(&self, path: &str, _buf: &mut [u8], offset: u64) -> isize {
        self.record(format!("read {path} {offset}"));
        self.result("read") as isize
    }

    fn write(&self, path: &str, buf: &[u8], offset: u64) -> isize {
        self.record(format!("write {path} {offset}"));
        match self.result("write") {
            0 => buf.len() as isize,
            rc => rc as isize,
        }
    }

    fn truncate(&self, path: &str, length: u64) -> i32 {
        self.record(format!("truncate {path} {length}"));
        self.result("truncate")
    }

    fn fsync(&self, path: &str) -> i32 {
        self.record(format!("fsync {path}"));
        self.result("fsync")
    }

    fn mkdir(&self, path: &str, mode: u32) -> i32 {
        self.record(format!("mkdir {path} {mode:o}"));
        self.result("mkdir")
    }

    fn rmdir(&self, path: &str) -> i32 {
        self.record(format!("rmdir {path}"));
        self.result("rmdir")
    }

    fn unlink(&self, path: &str) -> i32 {
        self.record(format!("unlink {path}"));
        self.result("unlink")
    }

    fn rename(&self, from: &str, to: &str) -> i32 {
        self.record(format!("rename {from} {to}"));
        self.result("rename")
    }

    fn link(&self, from: &str, to: &str) -> i32 {
        self.record(format!("link {from} {to}"));
        self.result("link")
    }

    fn symlink(&self, target: &str, link: &str) -> i32 {
        self.record(format!("symlink {target} {link}"));
        self.result("symlink")
    }

    fn getattr(&self, path: &str, stat: &mut FileStat) -> i32 {
        self.record(format!("getattr {path}"));
        let is_dir = self.directories.lock().contains(path);
        *stat = FileStat {
            mode: if is_dir {
                libc::S_IFDIR as u32 | 0o755
            } else {
                libc::S_IFREG as u32 | 0o644
            },
            nlink: 1,
            ..FileStat::default()
        };
        self.result("getattr")
    }

    fn access(&self, path: &str, _mode: i32) -> i32 {
        self.record(format!("access {path}"));
        self.result("access")
    }

    fn chmod(&self, path: &str, mode: u32) -> i32 {
        self.record(format!("chmod {path} {mode:o}"));
        self.result("chmod")
    }

    fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> i32 {
        let describe = |time: Option<SystemTime>| if time.is_some() { "set" } else { "keep" };
        self.record(format!(
            "utimens {path} atime={} mtime={}",
            describe(atime),
            describe(mtime)
        ));
        self.result("utimens")
    }

    fn is_dir(&self, path: &str) -> bool {
        self.record(format!("is_dir {path}"));
        self.directories.lock().contains(path)
    }

    fn readdir(&self, path: &str, filler: &mut dyn FnMut(&str)) -> i32 {
        self.record(format!("readdir {path}"));
        let rc = self.result("readdir");
        if rc == 0 {
            filler(".");
            filler("..");
            for name in self.entries.lock().iter() {
                filler(name);
            }
        }
        rc
    }

    fn begin_transaction(&self) -> i32 {
        self.record("begin_transaction".to_string());
        self.result("begin_transaction")
    }

    fn complete_transaction(&self, commit: bool) -> i32 {
        self.record(format!("complete_transaction {commit}"));
        self.result("complete_transaction")
    }
}
