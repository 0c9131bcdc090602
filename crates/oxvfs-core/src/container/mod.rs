//! The reference storage engine: an encrypted single-file container.
//!
//! The whole namespace lives in memory while the container is open and is
//! sealed back to disk after every mutation, or once per outermost
//! transaction when one is open.

pub mod format;
pub mod path;
pub mod tree;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::crypto::{ContainerKey, CryptoError, KdfParams, random_nonce, random_salt};
use crate::engine::{EngineHandle, FileStat, StorageEngine};
use crate::handles::HandleRegistry;

pub use format::{ContainerFormatError, CredentialKind};
pub use tree::Tree;

/// Configuration for [`ContainerEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// scrypt cost used when a password-protected container is created.
    /// Existing containers keep the cost recorded in their header.
    pub kdf: KdfParams,
}

/// Why a container could not be opened or written.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Format(#[from] ContainerFormatError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Corrupt container payload: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Container was created with a {expected:?} credential, got {actual:?}")]
    CredentialMismatch {
        expected: CredentialKind,
        actual: CredentialKind,
    },

    #[error("Password container header is missing its key derivation parameters")]
    MissingKdfParams,

    #[error("Another container is already open: {0}")]
    AlreadyOpen(PathBuf),
}

#[derive(Clone, Copy)]
enum Secret<'a> {
    Password(&'a str),
    Key(&'a [u8]),
}

impl Secret<'_> {
    fn kind(self) -> CredentialKind {
        match self {
            Secret::Password(_) => CredentialKind::Password,
            Secret::Key(_) => CredentialKind::Key,
        }
    }
}

/// Open transaction: nesting depth and the tree at the outermost begin.
struct Transaction {
    depth: u32,
    snapshot: Tree,
}

struct OpenContainer {
    path: PathBuf,
    credential: CredentialKind,
    salt: Option<Vec<u8>>,
    kdf: Option<KdfParams>,
    key: ContainerKey,
    tree: Tree,
    transaction: Option<Transaction>,
    /// File data written since the last save.
    dirty: bool,
}

impl OpenContainer {
    fn persist(&mut self) -> Result<(), EngineError> {
        let header = format::Header {
            credential: self.credential,
            salt: self.salt.clone(),
            kdf: self.kdf,
            nonce: random_nonce().to_vec(),
        };
        let header_bytes = format::encode_header(&header)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&self.tree)?);
        let ciphertext = self.key.seal(&plaintext, &header_bytes, &header.nonce()?)?;
        format::write_container(&self.path, &header_bytes, &ciphertext)?;
        self.dirty = false;
        Ok(())
    }

    fn save(&mut self) -> Result<(), i32> {
        self.persist().map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to persist container");
            libc::EIO
        })
    }

    /// Apply `op` and save, unless a transaction defers saving. A failed save
    /// puts the tree back as it was before `op`.
    fn mutate<T>(&mut self, op: impl FnOnce(&mut Tree) -> Result<T, i32>) -> Result<T, i32> {
        if self.transaction.is_some() {
            return op(&mut self.tree);
        }
        let before = self.tree.clone();
        let value = op(&mut self.tree)?;
        if let Err(errno) = self.save() {
            self.tree = before;
            return Err(errno);
        }
        Ok(value)
    }

    /// Save pending file data, if any.
    fn flush(&mut self) -> Result<(), i32> {
        if self.dirty && self.transaction.is_none() {
            self.save()?;
        }
        Ok(())
    }
}

/// How an operation touches the tree.
#[derive(Clone, Copy)]
enum Access {
    Read,
    /// File data change, saved on the next fsync, commit, save or last close.
    Deferred,
    /// Saved before the call returns.
    Persisted,
}

fn derive_key(
    secret: Secret<'_>,
    salt: Option<&[u8]>,
    kdf: Option<KdfParams>,
) -> Result<ContainerKey, EngineError> {
    match secret {
        Secret::Password(password) => {
            let (Some(salt), Some(kdf)) = (salt, kdf) else {
                return Err(EngineError::MissingKdfParams);
            };
            Ok(ContainerKey::derive(password, salt, kdf)?)
        }
        Secret::Key(key) => Ok(ContainerKey::from_raw(key)?),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn to_rc(result: Result<(), i32>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(errno) => -errno,
    }
}

/// Encrypted single-file [`StorageEngine`].
///
/// One container is open at a time. Further credential opens of the same
/// container with the same credential share it and add explicit handles.
pub struct ContainerEngine {
    config: EngineConfig,
    registry: Arc<HandleRegistry>,
    state: Mutex<Option<OpenContainer>>,
}

impl std::fmt::Debug for ContainerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ContainerEngine")
            .field("config", &self.config)
            .field("open", &state.as_ref().map(|c| c.path.clone()))
            .field("instances", &self.registry.count())
            .finish_non_exhaustive()
    }
}

impl Default for ContainerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: HandleRegistry::new(),
            state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Path of the open container, if any.
    pub fn open_path(&self) -> Option<PathBuf> {
        self.state.lock().as_ref().map(|c| c.path.clone())
    }

    #[instrument(level = "debug", skip(self, secret), fields(kind = ?secret.kind()))]
    fn open_container(&self, container: &Path, secret: Secret<'_>) -> Result<EngineHandle, EngineError> {
        let path = absolute(container);
        let mut state = self.state.lock();

        if let Some(open) = state.as_ref() {
            if open.path != path {
                return Err(EngineError::AlreadyOpen(open.path.clone()));
            }
            if open.credential != secret.kind() {
                return Err(EngineError::CredentialMismatch {
                    expected: open.credential,
                    actual: secret.kind(),
                });
            }
            let key = derive_key(secret, open.salt.as_deref(), open.kdf)?;
            if !key.matches(&open.key) {
                return Err(CryptoError::AuthenticationFailed.into());
            }
            let handle = self.registry.open();
            debug!(handle = %handle, "Additional handle on open container");
            return Ok(handle);
        }

        let opened = match format::read_container(&path)? {
            Some(raw) => {
                if raw.header.credential != secret.kind() {
                    return Err(EngineError::CredentialMismatch {
                        expected: raw.header.credential,
                        actual: secret.kind(),
                    });
                }
                let key = derive_key(secret, raw.header.salt.as_deref(), raw.header.kdf)?;
                let plaintext = key.open(&raw.ciphertext, &raw.header_bytes, &raw.header.nonce()?)?;
                let tree: Tree = serde_json::from_slice(&plaintext)?;
                debug!(entries = tree.len(), "Container decrypted");
                OpenContainer {
                    path,
                    credential: raw.header.credential,
                    salt: raw.header.salt,
                    kdf: raw.header.kdf,
                    key,
                    tree,
                    transaction: None,
                    dirty: false,
                }
            }
            None => {
                let (salt, kdf) = match secret {
                    Secret::Password(_) => (Some(random_salt().to_vec()), Some(self.config.kdf)),
                    Secret::Key(_) => (None, None),
                };
                let key = derive_key(secret, salt.as_deref(), kdf)?;
                let mut container = OpenContainer {
                    path,
                    credential: secret.kind(),
                    salt,
                    kdf,
                    key,
                    tree: Tree::new(),
                    transaction: None,
                    dirty: false,
                };
                container.persist()?;
                info!(path = %container.path.display(), "Created new container");
                container
            }
        };

        info!(path = %opened.path.display(), "Container opened");
        *state = Some(opened);
        Ok(self.registry.open())
    }

    fn credential_open(&self, container: &Path, secret: Secret<'_>) -> Option<EngineHandle> {
        match self.open_container(container, secret) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(path = %container.display(), error = %e, "Container open failed");
                None
            }
        }
    }

    /// Run `op` against the open container's tree.
    fn with_tree<T>(&self, access: Access, op: impl FnOnce(&mut Tree) -> Result<T, i32>) -> Result<T, i32> {
        let mut state = self.state.lock();
        let open = state.as_mut().ok_or(libc::ENXIO)?;
        self.registry.touch();
        match access {
            Access::Read => op(&mut open.tree),
            Access::Deferred => {
                let value = op(&mut open.tree)?;
                open.dirty = true;
                Ok(value)
            }
            Access::Persisted => open.mutate(op),
        }
    }

    fn path_op(&self, path: &str, access: Access, op: impl FnOnce(&mut Tree, &str) -> Result<(), i32>) -> i32 {
        to_rc(path::normalize(path).and_then(|key| self.with_tree(access, |tree| op(tree, &key))))
    }

    fn two_path_op(
        &self,
        from: &str,
        to: &str,
        op: impl FnOnce(&mut Tree, &str, &str) -> Result<(), i32>,
    ) -> i32 {
        let keys = path::normalize(from).and_then(|from| Ok((from, path::normalize(to)?)));
        to_rc(keys.and_then(|(from, to)| self.with_tree(Access::Persisted, |tree| op(tree, &from, &to))))
    }
}

impl StorageEngine for ContainerEngine {
    fn open_with_password(&self, container: &Path, password: &str) -> Option<EngineHandle> {
        self.credential_open(container, Secret::Password(password))
    }

    fn open_with_key(&self, container: &Path, key: &[u8]) -> Option<EngineHandle> {
        self.credential_open(container, Secret::Key(key))
    }

    #[instrument(level = "debug", skip(self), fields(handle = %handle))]
    fn close(&self, handle: EngineHandle) {
        let mut state = self.state.lock();
        match self.registry.close(handle) {
            None => warn!("Close of unknown engine handle"),
            Some(0) => {
                if let Some(mut open) = state.take() {
                    if let Some(transaction) = open.transaction.take() {
                        warn!(depth = transaction.depth, "Rolling back transaction left open at close");
                        open.tree = transaction.snapshot;
                    }
                    if let Err(e) = open.persist() {
                        error!(path = %open.path.display(), error = %e, "Failed to persist container on close");
                    }
                    info!(path = %open.path.display(), "Container closed");
                }
                self.registry.clear_implicit();
            }
            Some(remaining) => debug!(remaining, "Engine handle closed"),
        }
    }

    fn instance_count(&self) -> usize {
        self.registry.count()
    }

    fn create(&self, path: &str, mode: u32) -> i32 {
        self.path_op(path, Access::Persisted, |tree, key| tree.create(key, mode))
    }

    fn open(&self, path: &str, flags: i32) -> i32 {
        let access = if flags & libc::O_TRUNC != 0 { Access::Persisted } else { Access::Read };
        self.path_op(path, access, |tree, key| tree.open(key, flags))
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> isize {
        let result = path::normalize(path).and_then(|key| self.with_tree(Access::Read, |tree| tree.read(&key, buf, offset)));
        match result {
            Ok(n) => n as isize,
            Err(errno) => -(errno as isize),
        }
    }

    fn write(&self, path: &str, buf: &[u8], offset: u64) -> isize {
        let result = path::normalize(path).and_then(|key| self.with_tree(Access::Deferred, |tree| tree.write(&key, buf, offset)));
        match result {
            Ok(n) => n as isize,
            Err(errno) => -(errno as isize),
        }
    }

    fn truncate(&self, path: &str, length: u64) -> i32 {
        self.path_op(path, Access::Persisted, |tree, key| tree.truncate(key, length))
    }

    fn fsync(&self, path: &str) -> i32 {
        let result = path::normalize(path).and_then(|key| {
            let mut state = self.state.lock();
            let open = state.as_mut().ok_or(libc::ENXIO)?;
            self.registry.touch();
            if !open.tree.exists(&key) {
                return Err(libc::ENOENT);
            }
            open.flush()
        });
        to_rc(result)
    }

    fn mkdir(&self, path: &str, mode: u32) -> i32 {
        self.path_op(path, Access::Persisted, |tree, key| tree.mkdir(key, mode))
    }

    fn rmdir(&self, path: &str) -> i32 {
        self.path_op(path, Access::Persisted, Tree::rmdir)
    }

    fn unlink(&self, path: &str) -> i32 {
        self.path_op(path, Access::Persisted, Tree::unlink)
    }

    fn rename(&self, from: &str, to: &str) -> i32 {
        self.two_path_op(from, to, Tree::rename)
    }

    fn link(&self, from: &str, to: &str) -> i32 {
        self.two_path_op(from, to, Tree::link)
    }

    fn symlink(&self, target: &str, link: &str) -> i32 {
        // The target is stored verbatim; only the link path is a key
        self.path_op(link, Access::Persisted, |tree, key| tree.symlink(target, key))
    }

    fn getattr(&self, path: &str, stat: &mut FileStat) -> i32 {
        self.path_op(path, Access::Read, |tree, key| {
            *stat = tree.getattr(key)?;
            Ok(())
        })
    }

    fn access(&self, path: &str, mode: i32) -> i32 {
        self.path_op(path, Access::Read, |tree, key| tree.access(key, mode))
    }

    fn chmod(&self, path: &str, mode: u32) -> i32 {
        self.path_op(path, Access::Persisted, |tree, key| tree.chmod(key, mode))
    }

    fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> i32 {
        self.path_op(path, Access::Persisted, |tree, key| tree.utimens(key, atime, mtime))
    }

    fn is_dir(&self, path: &str) -> bool {
        path::normalize(path)
            .and_then(|key| self.with_tree(Access::Read, |tree| Ok(tree.is_dir(&key))))
            .unwrap_or(false)
    }

    fn readdir(&self, path: &str, filler: &mut dyn FnMut(&str)) -> i32 {
        // Collect under the lock, feed the filler after releasing it
        let names = path::normalize(path).and_then(|key| self.with_tree(Access::Read, |tree| tree.readdir(&key)));
        match names {
            Ok(names) => {
                for name in &names {
                    filler(name);
                }
                0
            }
            Err(errno) => -errno,
        }
    }

    fn begin_transaction(&self) -> i32 {
        let mut state = self.state.lock();
        let Some(open) = state.as_mut() else {
            return -libc::ENXIO;
        };
        self.registry.touch();
        match open.transaction.as_mut() {
            Some(transaction) => transaction.depth += 1,
            None => {
                open.transaction = Some(Transaction {
                    depth: 1,
                    snapshot: open.tree.clone(),
                });
            }
        }
        debug!(depth = open.transaction.as_ref().map_or(0, |t| t.depth), "Transaction begun");
        0
    }

    fn complete_transaction(&self, commit: bool) -> i32 {
        let mut state = self.state.lock();
        let Some(open) = state.as_mut() else {
            return -libc::ENXIO;
        };
        self.registry.touch();
        let Some(transaction) = open.transaction.as_mut() else {
            return -libc::EINVAL;
        };

        if !commit {
            let depth = transaction.depth;
            if let Some(transaction) = open.transaction.take() {
                open.tree = transaction.snapshot;
            }
            debug!(depth, "Transaction rolled back");
            return 0;
        }

        transaction.depth -= 1;
        if transaction.depth > 0 {
            return 0;
        }
        let Some(transaction) = open.transaction.take() else {
            return -libc::EINVAL;
        };
        // A commit that cannot be saved is rolled back
        if let Err(errno) = open.save() {
            open.tree = transaction.snapshot;
            warn!("Transaction rolled back after failed save");
            return -errno;
        }
        debug!("Transaction committed");
        0
    }
}
