//! Storage abstraction for CRDT persistence.
//!
//! This module defines the [`CrdtStorage`] trait which abstracts over different
//! storage backends (SQLite, in-memory) for persisting CRDT documents and updates.
//! The workspace store (§4.2) uses one logical "document" per collaborative
//! node/document id, so this trait underlies both `NodeState`/`NodeUpdate` and
//! `DocumentState`/`DocumentUpdate` from §3.

use super::types::{CrdtUpdate, UpdateOrigin};
use crate::error::EngineError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, EngineError>;

/// Trait for CRDT document storage backends.
///
/// # Storage model
///
/// 1. **Document snapshots** — compacted full state of a CRDT document.
/// 2. **Update log** — incremental updates for history, sync, and time-travel.
pub trait CrdtStorage: Send + Sync {
    /// Load the full document state as a binary blob. `None` if it doesn't exist.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full document state, overwriting any existing state.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Delete a document and all its updates.
    fn delete_doc(&self, name: &str) -> StorageResult<()>;

    /// List all document names in storage.
    fn list_docs(&self) -> StorageResult<Vec<String>>;

    /// Append an incremental update to the update log. Returns the new update's id.
    fn append_update(&self, name: &str, update: &[u8], origin: UpdateOrigin) -> StorageResult<i64> {
        self.append_update_with_device(name, update, origin, None, None)
    }

    /// Append an incremental update with device attribution.
    fn append_update_with_device(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> StorageResult<i64>;

    /// Append multiple updates atomically, in one transaction when the backend supports it.
    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(updates.len());
        for (name, update, origin) in updates {
            ids.push(self.append_update(name, update, *origin)?);
        }
        Ok(ids)
    }

    /// Get all updates for a document since a given update id (cursor-based pull, §4.4).
    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>>;

    /// Get all updates for a document.
    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>>;

    /// Reconstruct document state at a specific point in history (time-travel).
    fn get_state_at(&self, name: &str, update_id: i64) -> StorageResult<Option<Vec<u8>>>;

    /// Compact old updates into the document snapshot, keeping only the most recent `keep_updates`.
    fn compact(&self, name: &str, keep_updates: usize) -> StorageResult<()>;

    /// Get the latest update id for a document. Returns 0 if no updates exist.
    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64>;

    /// Rename a document, moving its snapshot and update log to a new name.
    fn rename_doc(&self, old_name: &str, new_name: &str) -> StorageResult<()>;
}
