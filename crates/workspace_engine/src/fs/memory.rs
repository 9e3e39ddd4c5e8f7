//! In-memory blob storage, used in tests and WASM embeddings.

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::BlobStore;

/// Blob storage backed by an in-process map, for tests and WASM hosts
/// that have no direct filesystem access.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no blob at {path:?}")))
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.blobs.write().unwrap().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.blobs.read().unwrap().contains_key(path)
    }

    fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let store = InMemoryBlobStore::new();
        let path = PathBuf::from("files/abc.png");
        store.write(&path, b"data").unwrap();
        assert!(store.exists(&path));
        assert_eq!(store.read(&path).unwrap(), b"data");
    }

    #[test]
    fn read_missing_errors() {
        let store = InMemoryBlobStore::new();
        assert!(store.read(Path::new("nope")).is_err());
    }
}
