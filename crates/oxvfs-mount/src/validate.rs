//! Credential and container path validation.
//!
//! These checks run before any engine call. They inspect the host filesystem
//! but never open or create the container file itself.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};
use oxvfs_core::REQUIRED_KEY_LENGTH;

use crate::error::{VfsError, VfsResult};

/// What unlocks a container. Borrowed for the duration of one call.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    Password(&'a str),
    Key(&'a [u8]),
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password([REDACTED])"),
            Credential::Key(key) => write!(f, "Key([REDACTED; {}])", key.len()),
        }
    }
}

fn is_blank(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

/// Resolve relative paths against the current directory.
pub(crate) fn absolute(path: &Path) -> VfsResult<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        VfsError::invalid_argument(format!("cannot resolve {}: {e}", path.display()))
    })
}

/// Check that `path` could hold a container: not blank, and its parent is a
/// readable and writable directory.
pub fn validate_container_path(path: &Path) -> VfsResult<()> {
    if is_blank(path) {
        return Err(VfsError::invalid_argument("container path must not be blank"));
    }

    let resolved = absolute(path)?;
    let Some(parent) = resolved.parent() else {
        return Err(VfsError::invalid_argument(format!(
            "container path {} has no parent directory",
            resolved.display()
        )));
    };

    let metadata = fs::metadata(parent).map_err(|e| {
        VfsError::invalid_argument(format!("cannot stat {}: {e}", parent.display()))
    })?;
    if !metadata.is_dir() {
        return Err(VfsError::invalid_argument(format!(
            "{} is not a directory",
            parent.display()
        )));
    }
    if access(parent, AccessFlags::R_OK).is_err() {
        return Err(VfsError::invalid_argument(format!(
            "{} is not readable",
            parent.display()
        )));
    }
    if access(parent, AccessFlags::W_OK).is_err() {
        return Err(VfsError::invalid_argument(format!(
            "{} is not writable",
            parent.display()
        )));
    }
    Ok(())
}

pub fn validate_key_length(key: &[u8]) -> VfsResult<()> {
    if key.len() != REQUIRED_KEY_LENGTH {
        return Err(VfsError::invalid_argument(format!(
            "key must be {REQUIRED_KEY_LENGTH} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> VfsResult<()> {
    if password.trim().is_empty() {
        return Err(VfsError::invalid_argument("password must not be blank"));
    }
    Ok(())
}

pub fn validate_credential(credential: &Credential<'_>) -> VfsResult<()> {
    match credential {
        Credential::Password(password) => validate_password(password),
        Credential::Key(key) => validate_key_length(key),
    }
}

/// Check that an existing container can be both read and written.
pub fn validate_container_read_write(path: &Path) -> VfsResult<()> {
    if access(path, AccessFlags::R_OK).is_err() {
        return Err(VfsError::invalid_argument(format!(
            "container {} does not exist or is not readable",
            path.display()
        )));
    }
    if access(path, AccessFlags::W_OK).is_err() {
        return Err(VfsError::invalid_argument(format!(
            "container {} is not writable",
            path.display()
        )));
    }
    Ok(())
}
