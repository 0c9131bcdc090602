//! Mount/session lifecycle.
//!
//! A [`VirtualFileSystem`] owns one storage engine and at most one mounted
//! container. Session state sits behind a read/write lock: lifecycle
//! transitions take the write side, every filesystem operation holds the read
//! side for its whole duration. Unmount therefore never overlaps an in-flight
//! operation, and its "no other threads" check cannot race a new one.

use std::fmt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use oxvfs_core::{EngineHandle, StorageEngine};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::{VfsError, VfsResult, check};
use crate::validate::{
    Credential, absolute, validate_container_path, validate_container_read_write,
    validate_credential,
};

/// Whether a container is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Unmounted => f.write_str("unmounted"),
            MountState::Mounted => f.write_str("mounted"),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    container_path: Option<PathBuf>,
    /// Held for exactly as long as the container is mounted.
    marker: Option<EngineHandle>,
}

/// A mount session over a storage engine.
pub struct VirtualFileSystem<E: StorageEngine> {
    engine: E,
    state: RwLock<SessionState>,
}

impl<E: StorageEngine> fmt::Debug for VirtualFileSystem<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("VirtualFileSystem")
            .field("container_path", &state.container_path)
            .field("marker", &state.marker)
            .finish_non_exhaustive()
    }
}

/// Read access to a mounted session, held for one operation.
pub(crate) struct Mounted<'a, E: StorageEngine> {
    engine: &'a E,
    guard: RwLockReadGuard<'a, SessionState>,
}

impl<E: StorageEngine> Mounted<'_, E> {
    pub(crate) fn engine(&self) -> &E {
        self.engine
    }

    pub(crate) fn container_path(&self) -> Option<&Path> {
        self.guard.container_path.as_deref()
    }
}

impl<E: StorageEngine> VirtualFileSystem<E> {
    /// A session with no container path configured.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// A session targeting `path`.
    pub fn with_container_path(engine: E, path: impl AsRef<Path>) -> VfsResult<Self> {
        let vfs = Self::new(engine);
        vfs.set_container_path(path)?;
        Ok(vfs)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Enter an operation. Fails with `IllegalState` when nothing is mounted.
    pub(crate) fn mounted(&self, operation: &'static str) -> VfsResult<Mounted<'_, E>> {
        let guard = self.state.read();
        if guard.marker.is_none() {
            debug!(operation, "Refused: not mounted");
            return Err(VfsError::illegal_state(format!(
                "virtual filesystem is not mounted ({operation})"
            )));
        }
        Ok(Mounted {
            engine: &self.engine,
            guard,
        })
    }

    #[instrument(level = "debug", skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn set_container_path(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let path = path.as_ref();
        let mut state = self.state.write();
        if state.marker.is_some() {
            warn!("Refused to change container path while mounted");
            return Err(VfsError::illegal_state(
                "cannot change the container path while mounted",
            ));
        }
        validate_container_path(path)?;
        let resolved = absolute(path)?;
        info!(path = %resolved.display(), "Container path set");
        state.container_path = Some(resolved);
        Ok(())
    }

    pub fn container_path(&self) -> Option<PathBuf> {
        self.state.read().container_path.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.state.read().marker.is_some()
    }

    pub fn state(&self) -> MountState {
        if self.is_mounted() {
            MountState::Mounted
        } else {
            MountState::Unmounted
        }
    }

    /// Engine handles currently open, the session's own marker included.
    /// Zero while unmounted.
    pub fn live_handle_count(&self) -> usize {
        let state = self.state.read();
        if state.marker.is_some() {
            self.engine.instance_count()
        } else {
            0
        }
    }

    fn open_engine(&self, path: &Path, credential: &Credential<'_>) -> Option<EngineHandle> {
        match credential {
            Credential::Password(password) => self.engine.open_with_password(path, password),
            Credential::Key(key) => self.engine.open_with_key(path, key),
        }
    }

    fn configured_path(state: &SessionState) -> VfsResult<PathBuf> {
        state
            .container_path
            .clone()
            .ok_or_else(|| VfsError::illegal_state("no container path configured"))
    }

    /// Materialize (or validate) the container with `credential`, leaving the
    /// session unmounted.
    #[instrument(level = "debug", skip(self))]
    pub fn create_new_container(&self, credential: &Credential<'_>) -> VfsResult<()> {
        let state = self.state.write();
        if state.marker.is_some() {
            warn!("Refused to create a container while mounted");
            return Err(VfsError::illegal_state(
                "cannot create a container while mounted",
            ));
        }
        let path = Self::configured_path(&state)?;
        validate_credential(credential)?;

        match self.open_engine(&path, credential) {
            Some(handle) => {
                self.engine.close(handle);
                info!(path = %path.display(), "Container created");
                Ok(())
            }
            None => {
                validate_container_read_write(&path)?;
                warn!(path = %path.display(), "Container creation failed");
                Err(VfsError::errno("create_new_container", Errno::EIO))
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub fn mount(&self, credential: &Credential<'_>) -> VfsResult<()> {
        let mut state = self.state.write();
        if state.marker.is_some() {
            warn!("Refused to mount: already mounted");
            return Err(VfsError::illegal_state("already mounted"));
        }
        let path = Self::configured_path(&state)?;
        validate_credential(credential)?;
        validate_container_read_write(&path)?;

        let Some(handle) = self.open_engine(&path, credential) else {
            warn!(path = %path.display(), "Mount failed");
            return Err(VfsError::invalid_argument(format!(
                "bad credential for container {}",
                path.display()
            )));
        };
        state.marker = Some(handle);
        info!(path = %path.display(), handle = %handle, "Mounted");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn unmount(&self) -> VfsResult<()> {
        let mut state = self.state.write();
        let Some(marker) = state.marker else {
            return Err(VfsError::illegal_state("not mounted"));
        };
        let count = self.engine.instance_count();
        if count > 1 {
            warn!(active = count - 1, "Refused to unmount");
            return Err(VfsError::illegal_state(format!(
                "{} threads still active",
                count - 1
            )));
        }
        self.engine.close(marker);
        state.marker = None;
        info!("Unmounted");
        Ok(())
    }

    pub fn begin_transaction(&self) -> VfsResult<()> {
        let session = self.mounted("begin_transaction")?;
        check("begin_transaction", session.engine().begin_transaction())?;
        Ok(())
    }

    pub fn complete_transaction(&self) -> VfsResult<()> {
        let session = self.mounted("complete_transaction")?;
        check("complete_transaction", session.engine().complete_transaction(true))?;
        Ok(())
    }

    /// Discard everything since the outermost `begin_transaction`.
    pub fn rollback_transaction(&self) -> VfsResult<()> {
        let session = self.mounted("rollback_transaction")?;
        check("rollback_transaction", session.engine().complete_transaction(false))?;
        Ok(())
    }
}

impl<E: StorageEngine> Drop for VirtualFileSystem<E> {
    fn drop(&mut self) {
        if let Some(marker) = self.state.get_mut().marker.take() {
            warn!("Session dropped while mounted; closing marker handle");
            self.engine.close(marker);
        }
    }
}
