//! Native blob storage. Only available on non-WASM targets.

use std::fs;
use std::io::Result;
use std::path::Path;

use super::BlobStore;

/// Blob storage backed directly by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealBlobStore;

impl BlobStore for RealBlobStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RealBlobStore;
        let path = dir.path().join("nested").join("blob.bin");
        store.write(&path, b"hello").unwrap();
        assert!(store.exists(&path));
        assert_eq!(store.read(&path).unwrap(), b"hello");
    }

    #[test]
    fn delete_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RealBlobStore;
        let path = dir.path().join("missing.bin");
        assert!(store.delete(&path).is_ok());
    }
}
