//! In-memory storage implementation for testing and WASM.
//!
//! This provides a simple in-memory implementation of [`CrdtStorage`]
//! for use in unit tests, development, and WASM environments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use yrs::{Doc, ReadTxn, Transact, Update, updates::decoder::Decode};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CrdtUpdate, UpdateOrigin};

/// Threshold for triggering auto-compaction (number of updates)
const AUTO_COMPACT_THRESHOLD: usize = 1000;

/// Number of updates to keep after auto-compaction
const AUTO_COMPACT_KEEP: usize = 500;

/// In-memory CRDT storage for testing.
///
/// This implementation stores all data in memory using `HashMap` and `Vec`.
/// It's thread-safe via `RwLock` but data is lost when dropped.
///
/// Auto-compaction is triggered when the number of updates for a document
/// exceeds [`AUTO_COMPACT_THRESHOLD`], keeping the most recent
/// [`AUTO_COMPACT_KEEP`] updates.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// Document snapshots (name -> binary state)
    docs: Arc<RwLock<HashMap<String, Vec<u8>>>>,

    /// Update logs (name -> list of updates)
    updates: Arc<RwLock<HashMap<String, Vec<StoredUpdate>>>>,

    /// Counter for generating update IDs
    next_id: Arc<RwLock<i64>>,
}

#[derive(Debug, Clone)]
struct StoredUpdate {
    id: i64,
    data: Vec<u8>,
    timestamp: i64,
    origin: UpdateOrigin,
    device_id: Option<String>,
    device_name: Option<String>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_update_id(&self) -> i64 {
        let mut id = self.next_id.write().unwrap();
        *id += 1;
        *id
    }
}

impl CrdtStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let mut docs = self.docs.write().unwrap();
        docs.insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        let mut docs = self.docs.write().unwrap();
        let mut updates = self.updates.write().unwrap();
        docs.remove(name);
        updates.remove(name);
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.keys().cloned().collect())
    }

    fn append_update_with_device(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> StorageResult<i64> {
        let id = self.next_update_id();
        let stored = StoredUpdate {
            id,
            data: update.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin,
            device_id: device_id.map(String::from),
            device_name: device_name.map(String::from),
        };

        let mut updates = self.updates.write().unwrap();
        let doc_updates = updates.entry(name.to_string()).or_default();
        doc_updates.push(stored);

        // Auto-compact if we've exceeded the threshold
        if doc_updates.len() > AUTO_COMPACT_THRESHOLD {
            let drain_count = doc_updates.len() - AUTO_COMPACT_KEEP;
            doc_updates.drain(0..drain_count);
        }

        Ok(id)
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let updates = self.updates.read().unwrap();
        let doc_updates = updates.get(name).map(|u| u.as_slice()).unwrap_or(&[]);

        Ok(doc_updates
            .iter()
            .filter(|u| u.id > since_id)
            .map(|u| CrdtUpdate {
                update_id: u.id,
                doc_name: name.to_string(),
                data: u.data.clone(),
                timestamp: u.timestamp,
                origin: u.origin,
                device_id: u.device_id.clone(),
                device_name: u.device_name.clone(),
            })
            .collect())
    }

    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>> {
        self.get_updates_since(name, 0)
    }

    fn get_state_at(&self, name: &str, update_id: i64) -> StorageResult<Option<Vec<u8>>> {
        // Load base document snapshot
        let base_state = self.load_doc(name)?;

        // Get updates up to the specified ID
        let updates_lock = self.updates.read().unwrap();
        let doc_updates: Vec<Vec<u8>> = updates_lock
            .get(name)
            .map(|updates| {
                updates
                    .iter()
                    .filter(|u| u.id <= update_id)
                    .map(|u| u.data.clone())
                    .collect()
            })
            .unwrap_or_default();

        // If no base state and no updates, return None
        if base_state.is_none() && doc_updates.is_empty() {
            return Ok(None);
        }

        // Create a new doc and apply all state
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();

            // Apply base state if it exists
            if let Some(state) = &base_state
                && let Ok(update) = Update::decode_v1(state)
            {
                if let Err(e) = txn.apply_update(update) {
                    log::warn!("Failed to apply base state for {}: {}", name, e);
                }
            }

            // Apply incremental updates up to the specified ID
            for update_data in doc_updates {
                if let Ok(update) = Update::decode_v1(&update_data) {
                    if let Err(e) = txn.apply_update(update) {
                        log::warn!("Failed to apply incremental update for {}: {}", name, e);
                    }
                }
            }
        }

        // Encode final state
        let txn = doc.transact();
        Ok(Some(txn.encode_state_as_update_v1(&Default::default())))
    }

    fn compact(&self, name: &str, keep_updates: usize) -> StorageResult<()> {
        let mut updates = self.updates.write().unwrap();

        if let Some(doc_updates) = updates.get_mut(name)
            && doc_updates.len() > keep_updates
        {
            // Keep only the last `keep_updates` entries
            let drain_count = doc_updates.len() - keep_updates;
            doc_updates.drain(0..drain_count);
        }

        Ok(())
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        let updates = self.updates.read().unwrap();
        Ok(updates
            .get(name)
            .and_then(|u| u.last())
            .map(|u| u.id)
            .unwrap_or(0))
    }

    fn rename_doc(&self, old_name: &str, new_name: &str) -> StorageResult<()> {
        // Copy document snapshot
        {
            let mut docs = self.docs.write().unwrap();
            if let Some(state) = docs.remove(old_name) {
                docs.insert(new_name.to_string(), state);
            }
        }

        // Copy updates with new doc_name
        {
            let mut updates = self.updates.write().unwrap();
            if let Some(old_updates) = updates.remove(old_name) {
                let new_updates: Vec<StoredUpdate> = old_updates
                    .into_iter()
                    .map(|u| StoredUpdate {
                        id: u.id,
                        data: u.data,
                        timestamp: u.timestamp,
                        origin: u.origin,
                        device_id: u.device_id,
                        device_name: u.device_name,
                    })
                    .collect();
                updates.insert(new_name.to_string(), new_updates);
            }
        }

        Ok(())
    }
}
