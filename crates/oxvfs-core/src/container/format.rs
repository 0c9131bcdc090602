//! On-disk container layout.
//!
//! ```text
//! magic (8) | header length (u32 LE) | header JSON | AES-256-GCM ciphertext
//! ```
//!
//! The header bytes are the AAD of the ciphertext, so editing the salt, cost
//! parameters or nonce breaks authentication just like editing the payload.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

use crate::crypto::{KdfParams, NONCE_LENGTH};

pub const MAGIC: &[u8; 8] = b"OXVFS\0\x01\0";

const LENGTH_FIELD: usize = 4;

/// Errors reading or writing a container file.
#[derive(Error, Debug)]
pub enum ContainerFormatError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not an oxvfs container (bad magic)")]
    BadMagic,

    #[error("Container is truncated")]
    Truncated,

    #[error("Invalid container header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("Invalid nonce length: expected {NONCE_LENGTH}, got {0}")]
    InvalidNonce(usize),
}

/// How the container key is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Password,
    Key,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub credential: CredentialKind,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
    #[serde_as(as = "Base64")]
    pub nonce: Vec<u8>,
}

impl Header {
    pub fn nonce(&self) -> Result<[u8; NONCE_LENGTH], ContainerFormatError> {
        self.nonce
            .as_slice()
            .try_into()
            .map_err(|_| ContainerFormatError::InvalidNonce(self.nonce.len()))
    }
}

/// A container as read from disk.
#[derive(Debug)]
pub struct RawContainer {
    pub header: Header,
    /// The exact header bytes, used as AAD.
    pub header_bytes: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Read a container file. A missing or empty file is `Ok(None)`.
pub fn read_container(path: &Path) -> Result<Option<RawContainer>, ContainerFormatError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    parse_container(&bytes).map(Some)
}

fn parse_container(bytes: &[u8]) -> Result<RawContainer, ContainerFormatError> {
    if bytes.len() < MAGIC.len() + LENGTH_FIELD {
        return Err(if bytes.starts_with(&MAGIC[..bytes.len().min(MAGIC.len())]) {
            ContainerFormatError::Truncated
        } else {
            ContainerFormatError::BadMagic
        });
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(ContainerFormatError::BadMagic);
    }

    let (length, rest) = rest.split_at(LENGTH_FIELD);
    let mut length_bytes = [0u8; LENGTH_FIELD];
    length_bytes.copy_from_slice(length);
    let header_len = u32::from_le_bytes(length_bytes) as usize;
    if rest.len() < header_len {
        return Err(ContainerFormatError::Truncated);
    }

    let (header_bytes, ciphertext) = rest.split_at(header_len);
    let header: Header = serde_json::from_slice(header_bytes)?;
    header.nonce()?;
    trace!(header_len, payload_len = ciphertext.len(), "Parsed container");

    Ok(RawContainer {
        header,
        header_bytes: header_bytes.to_vec(),
        ciphertext: ciphertext.to_vec(),
    })
}

pub fn encode_header(header: &Header) -> Result<Vec<u8>, ContainerFormatError> {
    Ok(serde_json::to_vec(header)?)
}

/// Atomically replace the container file.
///
/// The new content is written to a temporary file in the same directory and
/// renamed over `path`, so readers see either the old or the new container.
/// An existing container keeps its permission bits.
pub fn write_container(
    path: &Path,
    header_bytes: &[u8],
    ciphertext: &[u8],
) -> Result<(), ContainerFormatError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "container header too large"))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(MAGIC)?;
    tmp.write_all(&header_len.to_le_bytes())?;
    tmp.write_all(header_bytes)?;
    tmp.write_all(ciphertext)?;
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    debug!(
        path = %path.display(),
        bytes = MAGIC.len() + LENGTH_FIELD + header_bytes.len() + ciphertext.len(),
        "Container persisted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_header() -> Header {
        Header {
            credential: CredentialKind::Password,
            salt: Some(vec![1, 2, 3]),
            kdf: Some(KdfParams::insecure_fast()),
            nonce: vec![9; NONCE_LENGTH],
        }
    }

    #[test]
    fn test_missing_and_empty_files_are_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        assert!(read_container(&path).unwrap().is_none());

        fs::write(&path, b"").unwrap();
        assert!(read_container(&path).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        let header = sample_header();
        let header_bytes = encode_header(&header).unwrap();

        write_container(&path, &header_bytes, b"ciphertext").unwrap();
        let raw = read_container(&path).unwrap().unwrap();

        assert_eq!(raw.header, header);
        assert_eq!(raw.header_bytes, header_bytes);
        assert_eq!(raw.ciphertext, b"ciphertext");
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        let header_bytes = encode_header(&sample_header()).unwrap();

        write_container(&path, &header_bytes, b"first").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        write_container(&path, &header_bytes, b"second").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(read_container(&path).unwrap().unwrap().ciphertext, b"second");
    }

    #[test]
    fn test_key_header_omits_kdf_fields() {
        let header = Header {
            credential: CredentialKind::Key,
            salt: None,
            kdf: None,
            nonce: vec![0; NONCE_LENGTH],
        };
        let json = String::from_utf8(encode_header(&header).unwrap()).unwrap();
        assert!(json.contains("\"credential\":\"key\""));
        assert!(!json.contains("salt"));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        fs::write(&path, b"SQLite format 3\0 and more bytes").unwrap();
        assert!(matches!(
            read_container(&path),
            Err(ContainerFormatError::BadMagic)
        ));
    }

    #[test]
    fn test_rejects_truncated_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(b"{}");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_container(&path),
            Err(ContainerFormatError::Truncated)
        ));
    }

    #[test]
    fn test_rejects_bad_nonce_length() {
        let header = Header {
            nonce: vec![0; 4],
            ..sample_header()
        };
        let mut bytes = MAGIC.to_vec();
        let header_bytes = encode_header(&header).unwrap();
        bytes.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header_bytes);
        assert!(matches!(
            parse_container(&bytes),
            Err(ContainerFormatError::InvalidNonce(4))
        ));
    }
}
