//! Filesystem abstraction module.
//!
//! The engine touches the real filesystem in exactly two places: the
//! embedded SQL databases (opened directly via `rusqlite`, see `store` and
//! `crdt::sqlite_storage`) and file/avatar blobs (§6's persisted state
//! layout). This trait covers the latter, abstracted so tests can run
//! against an in-memory implementation instead of a temp directory.

#[cfg(not(target_arch = "wasm32"))]
mod native;

mod memory;

pub use memory::InMemoryBlobStore;
#[cfg(not(target_arch = "wasm32"))]
pub use native::RealBlobStore;

use std::io::Result;
use std::path::Path;

/// Abstraction over blob storage for file and avatar content.
/// Send + Sync required for multi-threaded host shells.
pub trait BlobStore: Send + Sync {
    /// Read the full contents of a blob.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a blob, creating parent directories as needed. Overwrites if present.
    fn write(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Delete a blob. Not an error if it does not exist.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Whether a blob exists at this path.
    fn exists(&self, path: &Path) -> bool;

    /// Create a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}
