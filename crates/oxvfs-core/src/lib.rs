//! Storage engine interface and the encrypted single-file container engine.
//!
//! [`StorageEngine`] is the path-keyed, negative-errno call surface the mount
//! layer consumes. [`ContainerEngine`] implements it over one AES-256-GCM
//! sealed container file.

pub mod container;
pub mod crypto;
pub mod engine;
mod handles;

pub use container::{ContainerEngine, EngineConfig, EngineError};
pub use crypto::KdfParams;
pub use engine::{ENGINE_PAGE_SIZE, EngineHandle, FileStat, MAX_FILE_SIZE, REQUIRED_KEY_LENGTH, StorageEngine};
