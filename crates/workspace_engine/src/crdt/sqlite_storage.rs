//! SQLite-backed storage implementation for CRDT persistence.
//!
//! This is a standalone `CrdtStorage` implementation, useful for exercising
//! the CRDT layer (§4.1) without a full workspace store, and in tests. The
//! workspace store (§4.2) persists its own `node_updates`/`document_updates`
//! tables directly so they can share a transaction with the relational
//! writes they accompany; see `store::schema` for that schema.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use yrs::{Doc, ReadTxn, Transact, Update, updates::decoder::Decode, updates::encoder::Encode};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CrdtUpdate, UpdateOrigin};
use crate::error::EngineError;

/// SQLite-backed CRDT storage.
///
/// The connection is wrapped in a `Mutex` for thread-safe access; SQLite
/// itself runs in serialized threading mode.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path, creating tables if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database, for tests.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                name TEXT PRIMARY KEY,
                state BLOB NOT NULL,
                state_vector BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- No foreign key: updates may arrive before the document snapshot exists.
            CREATE TABLE IF NOT EXISTS updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_name TEXT NOT NULL,
                data BLOB NOT NULL,
                origin TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                device_id TEXT,
                device_name TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_updates_doc_id ON updates(doc_name, id);
            "#,
        )?;
        Ok(())
    }

    /// Reconstruct CRDT state by applying updates up to (and including) a given id.
    fn reconstruct_state(&self, name: &str, up_to_id: i64) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();

        let base_state: Option<Vec<u8>> = conn
            .query_row(
                "SELECT state FROM documents WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .ok();

        let mut stmt = conn
            .prepare("SELECT data FROM updates WHERE doc_name = ? AND id <= ? ORDER BY id ASC")?;
        let updates: Vec<Vec<u8>> = stmt
            .query_map(params![name, up_to_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        if base_state.is_none() && updates.is_empty() {
            return Ok(None);
        }

        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            if let Some(state) = &base_state
                && let Ok(update) = Update::decode_v1(state)
            {
                let _ = txn.apply_update(update);
            }
            for update_data in updates {
                if let Ok(update) = Update::decode_v1(&update_data) {
                    let _ = txn.apply_update(update);
                }
            }
        }

        let txn = doc.transact();
        Ok(Some(txn.encode_state_as_update_v1(&Default::default())))
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl CrdtStorage for SqliteStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT state FROM documents WHERE name = ?",
            params![name],
            |row| row.get(0),
        );

        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(EngineError::Database(e)),
        }
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        let state_vector = {
            let doc = Doc::new();
            {
                let mut txn = doc.transact_mut();
                if let Ok(update) = Update::decode_v1(state) {
                    let _ = txn.apply_update(update);
                }
            }
            let txn = doc.transact();
            txn.state_vector().encode_v1()
        };

        conn.execute(
            "INSERT OR REPLACE INTO documents (name, state, state_vector, updated_at)
             VALUES (?, ?, ?, ?)",
            params![name, state, state_vector, now],
        )?;
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM updates WHERE doc_name = ?", params![name])?;
        conn.execute("DELETE FROM documents WHERE name = ?", params![name])?;
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM documents ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    fn append_update_with_device(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        device_id: Option<&str>,
        device_name: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        let origin_str = origin.to_string();

        conn.execute(
            "INSERT INTO updates (doc_name, data, origin, timestamp, device_id, device_name) VALUES (?, ?, ?, ?, ?, ?)",
            params![name, update, origin_str, now, device_id, device_name],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, data, origin, timestamp, device_id, device_name FROM updates
             WHERE doc_name = ? AND id > ?
             ORDER BY id ASC",
        )?;

        let updates = stmt
            .query_map(params![name, since_id], |row| {
                let origin_str: String = row.get(2)?;
                Ok(CrdtUpdate {
                    update_id: row.get(0)?,
                    doc_name: name.to_string(),
                    data: row.get(1)?,
                    timestamp: row.get(3)?,
                    origin: origin_str.parse().unwrap_or(UpdateOrigin::Local),
                    device_id: row.get(4)?,
                    device_name: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(updates)
    }

    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>> {
        self.get_updates_since(name, 0)
    }

    fn get_state_at(&self, name: &str, update_id: i64) -> StorageResult<Option<Vec<u8>>> {
        self.reconstruct_state(name, update_id)
    }

    fn compact(&self, name: &str, keep_updates: usize) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();

        let full_state = {
            let base_state: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT state FROM documents WHERE name = ?",
                    params![name],
                    |row| row.get(0),
                )
                .ok();

            let mut stmt =
                conn.prepare("SELECT data FROM updates WHERE doc_name = ? ORDER BY id ASC")?;
            let updates: Vec<Vec<u8>> = stmt
                .query_map(params![name], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();

            if base_state.is_none() && updates.is_empty() {
                return Ok(());
            }

            let doc = Doc::new();
            {
                let mut txn = doc.transact_mut();
                if let Some(state) = &base_state
                    && let Ok(update) = Update::decode_v1(state)
                {
                    let _ = txn.apply_update(update);
                }
                for update_data in &updates {
                    if let Ok(update) = Update::decode_v1(update_data) {
                        let _ = txn.apply_update(update);
                    }
                }
            }

            let txn = doc.transact();
            txn.encode_state_as_update_v1(&Default::default())
        };

        let update_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM updates WHERE doc_name = ?",
            params![name],
            |row| row.get(0),
        )?;

        if update_count as usize <= keep_updates {
            return Ok(());
        }

        let cutoff_id: i64 = conn
            .query_row(
                "SELECT id FROM updates WHERE doc_name = ? ORDER BY id DESC LIMIT 1 OFFSET ?",
                params![name, keep_updates - 1],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let now = chrono::Utc::now().timestamp_millis();
        let state_vector = {
            let doc = Doc::new();
            {
                let mut txn = doc.transact_mut();
                if let Ok(update) = Update::decode_v1(&full_state) {
                    let _ = txn.apply_update(update);
                }
            }
            let txn = doc.transact();
            txn.state_vector().encode_v1()
        };

        // Save the new snapshot before deleting old updates, so a crash
        // mid-operation never leaves the document without a reconstructible state.
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO documents (name, state, state_vector, updated_at)
             VALUES (?, ?, ?, ?)",
            params![name, full_state, state_vector, now],
        )?;
        tx.execute(
            "DELETE FROM updates WHERE doc_name = ? AND id < ?",
            params![name, cutoff_id],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        if updates.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(updates.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO updates (doc_name, data, origin, timestamp) VALUES (?, ?, ?, ?)",
            )?;

            for (name, update, origin) in updates {
                let origin_str = origin.to_string();
                stmt.execute(params![*name, *update, origin_str, now])?;
                ids.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id FROM updates WHERE doc_name = ? ORDER BY id DESC LIMIT 1",
            params![name],
            |row| row.get(0),
        );

        match result {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(EngineError::Database(e)),
        }
    }

    fn rename_doc(&self, old_name: &str, new_name: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE documents SET name = ? WHERE name = ?",
            params![new_name, old_name],
        )?;
        tx.execute(
            "UPDATE updates SET doc_name = ? WHERE doc_name = ?",
            params![new_name, old_name],
        )?;

        tx.commit()?;
        Ok(())
    }
}
