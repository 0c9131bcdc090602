//! The namespace sealed inside a container.
//!
//! Two B-trees: normalized path → inode number, and inode number → inode.
//! Hard links are several paths sharing one inode. All operations take
//! normalized keys and return a positive errno on failure.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use super::path::{child_prefix, file_name, is_descendant, parent};
use crate::engine::{ENGINE_PAGE_SIZE, FileStat, MAX_FILE_SIZE};

const ROOT_INO: u64 = 1;

/// What an inode holds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File {
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
    },
    Symlink {
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub kind: NodeKind,
    /// Permission bits only; the type comes from `kind`.
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Inode {
    fn new(kind: NodeKind, perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            perm: perm & 0o7777,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory => 0,
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Symlink { target } => target.len() as u64,
        }
    }

    fn type_bits(&self) -> u32 {
        match self.kind {
            NodeKind::Directory => libc::S_IFDIR as u32,
            NodeKind::File { .. } => libc::S_IFREG as u32,
            NodeKind::Symlink { .. } => libc::S_IFLNK as u32,
        }
    }

    fn touch_modified(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<String, u64>,
    inodes: BTreeMap<u64, Inode>,
    next_ino: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        let mut inodes = BTreeMap::new();
        entries.insert("/".to_string(), ROOT_INO);
        inodes.insert(ROOT_INO, Inode::new(NodeKind::Directory, 0o755));
        Self {
            entries,
            inodes,
            next_ino: ROOT_INO + 1,
        }
    }

    /// Number of paths in the namespace, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Result<u64, i32> {
        match self.entries.get(key) {
            Some(ino) => Ok(*ino),
            None => Err(self.missing_errno(key)),
        }
    }

    /// `ENOTDIR` if some ancestor of a missing path is not a directory.
    fn missing_errno(&self, key: &str) -> i32 {
        let mut current = parent(key);
        while let Some(ancestor) = current {
            if let Some(ino) = self.entries.get(ancestor) {
                return match self.inodes.get(ino) {
                    Some(inode) if !inode.is_dir() => libc::ENOTDIR,
                    _ => libc::ENOENT,
                };
            }
            current = parent(ancestor);
        }
        libc::ENOENT
    }

    fn node(&self, key: &str) -> Result<&Inode, i32> {
        let ino = self.lookup(key)?;
        self.inodes.get(&ino).ok_or(libc::EIO)
    }

    fn node_mut(&mut self, key: &str) -> Result<&mut Inode, i32> {
        let ino = self.lookup(key)?;
        self.inodes.get_mut(&ino).ok_or(libc::EIO)
    }

    fn require_parent_dir(&self, key: &str) -> Result<(), i32> {
        let parent = parent(key).ok_or(libc::EEXIST)?;
        if self.node(parent)?.is_dir() {
            Ok(())
        } else {
            Err(libc::ENOTDIR)
        }
    }

    fn touch_parent(&mut self, key: &str) {
        if let Some(parent) = parent(key)
            && let Ok(inode) = self.node_mut(parent)
        {
            inode.touch_modified();
        }
    }

    fn insert_node(&mut self, key: &str, inode: Inode) -> Result<u64, i32> {
        if self.entries.contains_key(key) {
            return Err(libc::EEXIST);
        }
        self.require_parent_dir(key)?;
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, inode);
        self.entries.insert(key.to_string(), ino);
        self.touch_parent(key);
        Ok(ino)
    }

    /// Drop one link to `ino`, freeing the inode with its last link.
    fn release(&mut self, ino: u64) {
        let remove = match self.inodes.get_mut(&ino) {
            Some(inode) => {
                inode.nlink = inode.nlink.saturating_sub(1);
                inode.ctime = SystemTime::now();
                inode.nlink == 0
            }
            None => false,
        };
        if remove {
            self.inodes.remove(&ino);
        }
    }

    fn child_keys(&self, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn descendant_keys(&self, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_dir(&self, key: &str) -> bool {
        self.node(key).is_ok_and(Inode::is_dir)
    }

    pub fn create(&mut self, key: &str, mode: u32) -> Result<(), i32> {
        let inode = Inode::new(NodeKind::File { data: Vec::new() }, mode);
        self.insert_node(key, inode).map(|_| ())
    }

    /// Check that `key` can be opened with `flags`, applying `O_TRUNC`.
    pub fn open(&mut self, key: &str, flags: i32) -> Result<(), i32> {
        let writing = flags & libc::O_ACCMODE != libc::O_RDONLY;
        let inode = self.node_mut(key)?;
        match &mut inode.kind {
            NodeKind::Directory if writing => Err(libc::EISDIR),
            NodeKind::File { data } if writing && flags & libc::O_TRUNC != 0 => {
                data.clear();
                inode.touch_modified();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn read(&self, key: &str, buf: &mut [u8], offset: u64) -> Result<usize, i32> {
        let data = match &self.node(key)?.kind {
            NodeKind::File { data } => data,
            NodeKind::Directory => return Err(libc::EISDIR),
            NodeKind::Symlink { .. } => return Err(libc::EINVAL),
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = usize::try_from(offset).map_err(|_| libc::EIO)?;
        if offset >= data.len() {
            return Err(libc::EIO);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    pub fn write(&mut self, key: &str, buf: &[u8], offset: u64) -> Result<usize, i32> {
        let inode = self.node_mut(key)?;
        let data = match &mut inode.kind {
            NodeKind::File { data } => data,
            NodeKind::Directory => return Err(libc::EISDIR),
            NodeKind::Symlink { .. } => return Err(libc::EINVAL),
        };
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(libc::EFBIG)?;
        let end = usize::try_from(end).map_err(|_| libc::EFBIG)?;
        let offset = end - buf.len();
        grow(data, end)?;
        data[offset..end].copy_from_slice(buf);
        inode.touch_modified();
        Ok(buf.len())
    }

    pub fn truncate(&mut self, key: &str, length: u64) -> Result<(), i32> {
        let inode = self.node_mut(key)?;
        let data = match &mut inode.kind {
            NodeKind::File { data } => data,
            NodeKind::Directory => return Err(libc::EISDIR),
            NodeKind::Symlink { .. } => return Err(libc::EINVAL),
        };
        let length = Some(length)
            .filter(|&length| length <= MAX_FILE_SIZE)
            .and_then(|length| usize::try_from(length).ok())
            .ok_or(libc::EFBIG)?;
        if length > data.len() {
            grow(data, length)?;
        } else {
            data.truncate(length);
        }
        inode.touch_modified();
        Ok(())
    }

    pub fn mkdir(&mut self, key: &str, mode: u32) -> Result<(), i32> {
        self.insert_node(key, Inode::new(NodeKind::Directory, mode))
            .map(|_| ())
    }

    pub fn rmdir(&mut self, key: &str) -> Result<(), i32> {
        if key == "/" {
            return Err(libc::EBUSY);
        }
        let ino = self.lookup(key)?;
        if !self.node(key)?.is_dir() {
            return Err(libc::ENOTDIR);
        }
        if !self.child_keys(key).is_empty() {
            return Err(libc::ENOTEMPTY);
        }
        self.entries.remove(key);
        self.release(ino);
        self.touch_parent(key);
        Ok(())
    }

    pub fn unlink(&mut self, key: &str) -> Result<(), i32> {
        let ino = self.lookup(key)?;
        if self.node(key)?.is_dir() {
            return Err(libc::EISDIR);
        }
        self.entries.remove(key);
        self.release(ino);
        self.touch_parent(key);
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), i32> {
        let ino = self.lookup(from)?;
        if from == to {
            return Ok(());
        }
        if from == "/" || to == "/" {
            return Err(libc::EBUSY);
        }
        if is_descendant(to, from) {
            return Err(libc::EINVAL);
        }
        self.require_parent_dir(to)?;

        let moving_dir = self.node(from)?.is_dir();
        if let Some(&existing) = self.entries.get(to) {
            if existing == ino {
                // Both names are links to the same file
                return Ok(());
            }
            let target_is_dir = self.node(to)?.is_dir();
            match (moving_dir, target_is_dir) {
                (true, false) => return Err(libc::ENOTDIR),
                (false, true) => return Err(libc::EISDIR),
                (true, true) if !self.child_keys(to).is_empty() => return Err(libc::ENOTEMPTY),
                _ => {}
            }
            self.entries.remove(to);
            self.release(existing);
        }

        let mut moved = vec![from.to_string()];
        if moving_dir {
            moved.extend(self.descendant_keys(from));
        }
        for old_key in moved {
            if let Some(node_ino) = self.entries.remove(&old_key) {
                let new_key = format!("{to}{}", &old_key[from.len()..]);
                self.entries.insert(new_key, node_ino);
            }
        }

        if let Some(inode) = self.inodes.get_mut(&ino) {
            inode.ctime = SystemTime::now();
        }
        self.touch_parent(from);
        self.touch_parent(to);
        Ok(())
    }

    pub fn link(&mut self, from: &str, to: &str) -> Result<(), i32> {
        let ino = self.lookup(from)?;
        if self.node(from)?.is_dir() {
            return Err(libc::EPERM);
        }
        if self.entries.contains_key(to) {
            return Err(libc::EEXIST);
        }
        self.require_parent_dir(to)?;
        self.entries.insert(to.to_string(), ino);
        if let Some(inode) = self.inodes.get_mut(&ino) {
            inode.nlink += 1;
            inode.ctime = SystemTime::now();
        }
        self.touch_parent(to);
        Ok(())
    }

    pub fn symlink(&mut self, target: &str, link: &str) -> Result<(), i32> {
        let inode = Inode::new(
            NodeKind::Symlink {
                target: target.to_string(),
            },
            0o777,
        );
        self.insert_node(link, inode).map(|_| ())
    }

    pub fn getattr(&self, key: &str) -> Result<FileStat, i32> {
        let ino = self.lookup(key)?;
        let inode = self.inodes.get(&ino).ok_or(libc::EIO)?;
        let size = inode.size();
        let nlink = if inode.is_dir() {
            // "." plus the entry in the parent, plus ".." of every subdirectory
            2 + self
                .child_keys(key)
                .iter()
                .filter(|child| self.is_dir(child))
                .count() as u64
        } else {
            u64::from(inode.nlink)
        };
        Ok(FileStat {
            dev: 0,
            ino,
            mode: inode.type_bits() | inode.perm,
            nlink,
            uid: inode.uid,
            gid: inode.gid,
            rdev: 0,
            size,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            blksize: ENGINE_PAGE_SIZE,
            blocks: size.div_ceil(512),
        })
    }

    /// Owner-class permission check; `F_OK` only checks existence.
    pub fn access(&self, key: &str, mode: i32) -> Result<(), i32> {
        let inode = self.node(key)?;
        if mode == libc::F_OK {
            return Ok(());
        }
        let owner_bits = (inode.perm >> 6) & 0o7;
        let wanted = (mode & (libc::R_OK | libc::W_OK | libc::X_OK)) as u32;
        if owner_bits & wanted == wanted {
            Ok(())
        } else {
            Err(libc::EACCES)
        }
    }

    pub fn chmod(&mut self, key: &str, mode: u32) -> Result<(), i32> {
        let inode = self.node_mut(key)?;
        inode.perm = mode & 0o7777;
        inode.ctime = SystemTime::now();
        Ok(())
    }

    pub fn utimens(
        &mut self,
        key: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<(), i32> {
        let inode = self.node_mut(key)?;
        if let Some(atime) = atime {
            inode.atime = atime;
        }
        if let Some(mtime) = mtime {
            inode.mtime = mtime;
        }
        inode.ctime = SystemTime::now();
        Ok(())
    }

    /// Entry names of a directory, `.` and `..` first.
    pub fn readdir(&self, key: &str) -> Result<Vec<String>, i32> {
        if !self.node(key)?.is_dir() {
            return Err(libc::ENOTDIR);
        }
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(
            self.child_keys(key)
                .iter()
                .map(|child| file_name(child).to_string()),
        );
        Ok(names)
    }
}

/// Zero-extend `data` to `len` bytes. An allocation failure is `ENOSPC`.
fn grow(data: &mut Vec<u8>, len: usize) -> Result<(), i32> {
    if data.len() < len {
        data.try_reserve_exact(len - data.len()).map_err(|_| libc::ENOSPC)?;
        data.resize(len, 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_file(key: &str, content: &[u8]) -> Tree {
        let mut tree = Tree::new();
        tree.create(key, 0o644).unwrap();
        tree.write(key, content, 0).unwrap();
        tree
    }

    #[test]
    fn test_new_tree_has_root() {
        let tree = Tree::new();
        assert!(tree.is_dir("/"));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.readdir("/").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn test_create_requires_parent_directory() {
        let mut tree = Tree::new();
        assert_eq!(tree.create("/missing/file", 0o644), Err(libc::ENOENT));

        tree.create("/file", 0o644).unwrap();
        assert_eq!(tree.create("/file/child", 0o644), Err(libc::ENOTDIR));
        assert_eq!(tree.create("/file", 0o644), Err(libc::EEXIST));
    }

    #[test]
    fn test_read_past_end_is_eio() {
        let tree = tree_with_file("/f", b"hello");
        let mut buf = [0u8; 8];

        assert_eq!(tree.read("/f", &mut buf, 0), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(tree.read("/f", &mut buf, 3), Ok(2));
        assert_eq!(tree.read("/f", &mut buf, 5), Err(libc::EIO));
        assert_eq!(tree.read("/f", &mut [], 5), Ok(0));
    }

    #[test]
    fn test_write_sparse_zero_fills() {
        let mut tree = tree_with_file("/f", b"ab");
        tree.write("/f", b"z", 4).unwrap();

        let mut buf = [0xffu8; 5];
        assert_eq!(tree.read("/f", &mut buf, 0), Ok(5));
        assert_eq!(&buf, b"ab\0\0z");
    }

    #[test]
    fn test_oversized_write_and_truncate_are_efbig() {
        let mut tree = tree_with_file("/f", b"keep");

        assert_eq!(tree.write("/f", b"x", u64::MAX - 8), Err(libc::EFBIG));
        assert_eq!(tree.write("/f", b"xy", MAX_FILE_SIZE - 1), Err(libc::EFBIG));
        assert_eq!(tree.truncate("/f", 1u64 << 63), Err(libc::EFBIG));
        assert_eq!(tree.truncate("/f", MAX_FILE_SIZE + 1), Err(libc::EFBIG));
        assert_eq!(tree.getattr("/f").unwrap().size, 4);

        tree.truncate("/f", 2).unwrap();
        tree.truncate("/f", 3).unwrap();
        let mut buf = [0xffu8; 3];
        assert_eq!(tree.read("/f", &mut buf, 0), Ok(3));
        assert_eq!(&buf, b"ke\0");
    }

    #[test]
    fn test_open_truncates_and_rejects_writable_directory() {
        let mut tree = tree_with_file("/f", b"content");
        tree.open("/f", libc::O_WRONLY | libc::O_TRUNC).unwrap();
        assert_eq!(tree.getattr("/f").unwrap().size, 0);

        tree.mkdir("/d", 0o755).unwrap();
        assert_eq!(tree.open("/d", libc::O_RDWR), Err(libc::EISDIR));
        assert_eq!(tree.open("/d", libc::O_RDONLY), Ok(()));
        assert_eq!(tree.open("/nope", libc::O_RDONLY), Err(libc::ENOENT));
    }

    #[test]
    fn test_rmdir_and_unlink_errors() {
        let mut tree = Tree::new();
        tree.mkdir("/d", 0o755).unwrap();
        tree.create("/d/f", 0o644).unwrap();

        assert_eq!(tree.rmdir("/d"), Err(libc::ENOTEMPTY));
        assert_eq!(tree.rmdir("/d/f"), Err(libc::ENOTDIR));
        assert_eq!(tree.unlink("/d"), Err(libc::EISDIR));
        assert_eq!(tree.rmdir("/"), Err(libc::EBUSY));

        tree.unlink("/d/f").unwrap();
        tree.rmdir("/d").unwrap();
        assert!(!tree.exists("/d"));
    }

    #[test]
    fn test_rename_directory_moves_subtree() {
        let mut tree = Tree::new();
        tree.mkdir("/a", 0o755).unwrap();
        tree.mkdir("/a/b", 0o755).unwrap();
        tree.create("/a/b/f", 0o644).unwrap();
        tree.create("/ab", 0o644).unwrap();

        tree.rename("/a", "/c").unwrap();

        assert!(tree.exists("/c/b/f"));
        assert!(!tree.exists("/a"));
        assert!(!tree.exists("/a/b/f"));
        // Sibling sharing the prefix is untouched
        assert!(tree.exists("/ab"));
    }

    #[test]
    fn test_rename_into_self_and_over_nonempty_dir() {
        let mut tree = Tree::new();
        tree.mkdir("/a", 0o755).unwrap();
        tree.mkdir("/b", 0o755).unwrap();
        tree.create("/b/f", 0o644).unwrap();
        tree.create("/file", 0o644).unwrap();

        assert_eq!(tree.rename("/a", "/a/inner"), Err(libc::EINVAL));
        assert_eq!(tree.rename("/a", "/b"), Err(libc::ENOTEMPTY));
        assert_eq!(tree.rename("/a", "/file"), Err(libc::ENOTDIR));
        assert_eq!(tree.rename("/file", "/a"), Err(libc::EISDIR));
    }

    #[test]
    fn test_rename_replaces_file() {
        let mut tree = tree_with_file("/src", b"new");
        tree.create("/dst", 0o644).unwrap();
        tree.write("/dst", b"old", 0).unwrap();

        tree.rename("/src", "/dst").unwrap();

        let mut buf = [0u8; 3];
        tree.read("/dst", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"new");
        assert!(!tree.exists("/src"));
    }

    #[test]
    fn test_hard_link_shares_content() {
        let mut tree = tree_with_file("/f", b"shared");
        tree.link("/f", "/g").unwrap();
        assert_eq!(tree.getattr("/f").unwrap().nlink, 2);

        tree.write("/g", b"S", 0).unwrap();
        let mut buf = [0u8; 6];
        tree.read("/f", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"Shared");

        tree.unlink("/f").unwrap();
        assert_eq!(tree.getattr("/g").unwrap().nlink, 1);
        assert_eq!(tree.link("/", "/root-link"), Err(libc::EPERM));
    }

    #[test]
    fn test_symlink_stat() {
        let mut tree = Tree::new();
        tree.symlink("/target", "/link").unwrap();
        let stat = tree.getattr("/link").unwrap();
        assert!(stat.is_symlink());
        assert_eq!(stat.size, "/target".len() as u64);
    }

    #[test]
    fn test_access_uses_owner_bits() {
        let mut tree = tree_with_file("/f", b"");
        tree.chmod("/f", 0o400).unwrap();

        assert_eq!(tree.access("/f", libc::F_OK), Ok(()));
        assert_eq!(tree.access("/f", libc::R_OK), Ok(()));
        assert_eq!(tree.access("/f", libc::W_OK), Err(libc::EACCES));
        assert_eq!(tree.access("/missing", libc::F_OK), Err(libc::ENOENT));
    }

    #[test]
    fn test_readdir_lists_direct_children_only() {
        let mut tree = Tree::new();
        tree.mkdir("/d", 0o755).unwrap();
        tree.mkdir("/d/sub", 0o755).unwrap();
        tree.create("/d/sub/deep", 0o644).unwrap();
        tree.create("/d/f", 0o644).unwrap();

        assert_eq!(tree.readdir("/d").unwrap(), vec![".", "..", "f", "sub"]);
        assert_eq!(tree.readdir("/d/f"), Err(libc::ENOTDIR));
        assert_eq!(tree.getattr("/d").unwrap().nlink, 3);
    }

    #[test]
    fn test_utimens_sets_times() {
        let mut tree = tree_with_file("/f", b"");
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        tree.utimens("/f", None, Some(when)).unwrap();
        assert_eq!(tree.getattr("/f").unwrap().mtime, when);
    }

    #[test]
    fn test_serde_roundtrip_preserves_tree() {
        let tree = tree_with_file("/f", b"\x00\x01binary");
        let json = serde_json::to_vec(&tree).unwrap();
        let back: Tree = serde_json::from_slice(&json).unwrap();
        assert_eq!(tree, back);
    }
}
