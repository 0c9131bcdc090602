//! Throwaway containers backed by the real engine.

use std::path::{Path, PathBuf};

use oxvfs_core::{ContainerEngine, EngineConfig, KdfParams};
use tempfile::TempDir;

use crate::session::VirtualFileSystem;
use crate::validate::Credential;

/// Password used by [`TempContainer::mounted`].
pub const TEST_PASSWORD: &str = "test-password";

/// A container path inside a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TempContainer {
    dir: TempDir,
    path: PathBuf,
}

impl TempContainer {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("container.db");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// An engine with cheap key derivation.
    pub fn engine() -> ContainerEngine {
        ContainerEngine::with_config(EngineConfig {
            kdf: KdfParams::insecure_fast(),
        })
    }

    /// An unmounted session targeting this container.
    ///
    /// # Panics
    ///
    /// Panics if the container path is rejected.
    pub fn session(&self) -> VirtualFileSystem<ContainerEngine> {
        VirtualFileSystem::with_container_path(Self::engine(), &self.path)
            .expect("temp container path rejected")
    }

    /// A session with a freshly created container mounted with
    /// [`TEST_PASSWORD`].
    ///
    /// # Panics
    ///
    /// Panics if the container cannot be created or mounted.
    pub fn mounted(&self) -> VirtualFileSystem<ContainerEngine> {
        let vfs = self.session();
        let credential = Credential::Password(TEST_PASSWORD);
        vfs.create_new_container(&credential)
            .expect("failed to create container");
        vfs.mount(&credential).expect("failed to mount container");
        vfs
    }
}

impl Default for TempContainer {
    fn default() -> Self {
        Self::new()
    }
}
