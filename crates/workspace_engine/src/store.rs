//! Workspace store (§4.2): the durable, queryable replica of one
//! workspace's node graph and collaborative documents.
//!
//! Deliberately does *not* route node/document CRDT persistence through the
//! standalone `crdt::CrdtStorage` trait: that trait's own connection lock
//! would make it impossible to keep a node's relational row and its CRDT
//! update log in the same transaction, which §4.2 requires for operations
//! like `apply_node_attributes`. Instead this module owns its connection
//! directly and persists the CRDT update log as `node_updates`/
//! `document_updates` rows alongside the relational writes.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::crdt::{CrdtDocument, Schema, UpdateOrigin};
use crate::error::{EngineError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::queue;

/// Schema DDL for one workspace database (§3 entities this module owns).
const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    attributes TEXT NOT NULL,
    type TEXT GENERATED ALWAYS AS (json_extract(attributes, '$.type')) STORED,
    parent_id TEXT GENERATED ALWAYS AS (json_extract(attributes, '$.parentId')) STORED,
    root_id TEXT,
    local_revision INTEGER NOT NULL,
    server_revision INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
CREATE INDEX IF NOT EXISTS idx_nodes_root ON nodes(root_id);

CREATE TABLE IF NOT EXISTS node_states (
    node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
    state BLOB NOT NULL,
    revision INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS node_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    data BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_node_updates_node ON node_updates(node_id, id);

CREATE TABLE IF NOT EXISTS tombstones (
    id TEXT PRIMARY KEY,
    data TEXT,
    deleted_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cursors (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS node_texts USING fts5(id UNINDEXED, name, attributes);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    type TEXT GENERATED ALWAYS AS (json_extract(content, '$.type')) STORED,
    local_revision INTEGER NOT NULL,
    server_revision INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_states (
    document_id TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
    state BLOB NOT NULL,
    revision INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    data BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_document_updates_document ON document_updates(document_id, id);

CREATE VIRTUAL TABLE IF NOT EXISTS document_texts USING fts5(id UNINDEXED, text);

CREATE TABLE IF NOT EXISTS node_interactions (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    collaborator_id TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    first_opened_at INTEGER,
    last_opened_at INTEGER,
    revision INTEGER NOT NULL,
    PRIMARY KEY (node_id, collaborator_id)
);

CREATE TABLE IF NOT EXISTS node_reactions (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    collaborator_id TEXT NOT NULL,
    reaction TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    revision INTEGER NOT NULL,
    PRIMARY KEY (node_id, collaborator_id, reaction)
);

CREATE TABLE IF NOT EXISTS node_references (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    reference_id TEXT NOT NULL,
    inner_id TEXT NOT NULL,
    type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    PRIMARY KEY (node_id, reference_id, inner_id)
);

CREATE INDEX IF NOT EXISTS idx_node_references_backlinks ON node_references(reference_id);

CREATE TABLE IF NOT EXISTS node_counters (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (node_id, type)
);
"#;

/// A node row (§3 `Node`), after generated columns are projected out.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub node_type: String,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub attributes: Value,
    pub local_revision: i64,
    pub server_revision: i64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// A node record as received from the server (§4.2 `applyRemoteNode`).
pub struct RemoteNode {
    pub id: String,
    pub root_id: Option<String>,
    pub attributes: Value,
    pub server_revision: i64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// A document row (§3 `Document`): the collaborative content body owned by a page/record node.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: Value,
    pub document_type: String,
    pub local_revision: i64,
    pub server_revision: i64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// A document record as received from the server (§4.2 `applyRemoteDocument`).
pub struct RemoteDocument {
    pub id: String,
    pub content: Value,
    pub server_revision: i64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
}

/// One node-to-node mention or link, diffed out of a node's text content
/// (§3 `NodeReference`). `inner_id` distinguishes multiple references to the
/// same target from a single source (e.g. two mentions of the same page).
#[derive(Debug, Clone)]
pub struct NodeReference {
    pub node_id: String,
    pub reference_id: String,
    pub inner_id: String,
    pub reference_type: String,
    pub created_at: i64,
    pub created_by: String,
}

fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    let attributes_text: String = row.get(1)?;
    Ok(Node {
        id: row.get(0)?,
        attributes: serde_json::from_str(&attributes_text).unwrap_or(Value::Null),
        node_type: row.get(2)?,
        parent_id: row.get(3)?,
        root_id: row.get(4)?,
        local_revision: row.get(5)?,
        server_revision: row.get(6)?,
        created_at: row.get(7)?,
        created_by: row.get(8)?,
        updated_at: row.get(9)?,
        updated_by: row.get(10)?,
    })
}

const NODE_COLUMNS: &str =
    "id, attributes, type, parent_id, root_id, local_revision, server_revision, created_at, created_by, updated_at, updated_by";

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let content_text: String = row.get(1)?;
    Ok(Document {
        id: row.get(0)?,
        content: serde_json::from_str(&content_text).unwrap_or(Value::Null),
        document_type: row.get(2)?,
        local_revision: row.get(3)?,
        server_revision: row.get(4)?,
        created_at: row.get(5)?,
        created_by: row.get(6)?,
        updated_at: row.get(7)?,
        updated_by: row.get(8)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, content, type, local_revision, server_revision, created_at, created_by, updated_at, updated_by";

fn row_to_reference(row: &Row) -> rusqlite::Result<NodeReference> {
    Ok(NodeReference {
        node_id: row.get(0)?,
        reference_id: row.get(1)?,
        inner_id: row.get(2)?,
        reference_type: row.get(3)?,
        created_at: row.get(4)?,
        created_by: row.get(5)?,
    })
}

const REFERENCE_COLUMNS: &str = "node_id, reference_id, inner_id, type, created_at, created_by";

/// The durable replica of one workspace (§4.2).
pub struct WorkspaceStore {
    conn: Mutex<Connection>,
    workspace_id: String,
    events: Arc<EventBus>,
}

impl WorkspaceStore {
    /// Open or create a workspace database at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        workspace_id: impl Into<String>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            workspace_id: workspace_id.into(),
            events,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory workspace database, for tests.
    pub fn in_memory(workspace_id: impl Into<String>, events: Arc<EventBus>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            workspace_id: workspace_id.into(),
            events,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(queue::SCHEMA)?;
        Ok(())
    }

    /// Fetch a single node by id. `None` if it doesn't exist (or is tombstoned).
    pub fn fetch_node(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
            params![id],
            row_to_node,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Fetch a single document by id (the node's collaborative content body).
    pub fn fetch_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"),
            params![id],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    /// The chain from `id` up to the enclosing space, via a recursive CTE over `parent_id`.
    pub fn fetch_node_tree(&self, id: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            WITH RECURSIVE tree(id) AS (
                SELECT id FROM nodes WHERE id = ?
                UNION ALL
                SELECT n.parent_id FROM nodes n JOIN tree t ON n.id = t.id WHERE n.parent_id IS NOT NULL
            )
            SELECT {NODE_COLUMNS} FROM nodes WHERE id IN (SELECT id FROM tree)
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id], row_to_node)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Every descendant of `id` (transitive closure over `parent_id`).
    pub fn fetch_descendants(&self, id: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            WITH RECURSIVE descendants(id) AS (
                SELECT id FROM nodes WHERE parent_id = ?
                UNION ALL
                SELECT n.id FROM nodes n JOIN descendants d ON n.parent_id = d.id
            )
            SELECT {NODE_COLUMNS} FROM nodes WHERE id IN (SELECT id FROM descendants)
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id], row_to_node)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Every node that references `reference_id`, for rendering backlinks (§4.2).
    pub fn backlinks(&self, reference_id: &str) -> Result<Vec<NodeReference>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFERENCE_COLUMNS} FROM node_references WHERE reference_id = ?"
        ))?;
        let rows = stmt
            .query_map(params![reference_id], row_to_reference)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Run a closure against the raw connection, for callers outside this
    /// module that need to share a transaction with store state — the
    /// mutation queue (§4.3) being the main one, since it lives in the same
    /// database rather than behind its own lock.
    pub fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Reconstruct the node's `CrdtDocument` from its stored snapshot + update log.
    fn load_node_doc(conn: &Connection, node_id: &str) -> Result<CrdtDocument> {
        let base: Option<Vec<u8>> = conn
            .query_row(
                "SELECT state FROM node_states WHERE node_id = ?",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stmt = conn.prepare("SELECT data FROM node_updates WHERE node_id = ? ORDER BY id ASC")?;
        let updates: Vec<Vec<u8>> = stmt
            .query_map(params![node_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut all_updates = Vec::with_capacity(updates.len() + 1);
        if let Some(state) = base {
            all_updates.push(state);
        }
        all_updates.extend(updates);

        CrdtDocument::from_updates(&all_updates)
    }

    /// Reconstruct a document's `CrdtDocument` from its stored snapshot + update log.
    fn load_document_doc(conn: &Connection, document_id: &str) -> Result<CrdtDocument> {
        let base: Option<Vec<u8>> = conn
            .query_row(
                "SELECT state FROM document_states WHERE document_id = ?",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut stmt =
            conn.prepare("SELECT data FROM document_updates WHERE document_id = ? ORDER BY id ASC")?;
        let updates: Vec<Vec<u8>> = stmt
            .query_map(params![document_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut all_updates = Vec::with_capacity(updates.len() + 1);
        if let Some(state) = base {
            all_updates.push(state);
        }
        all_updates.extend(updates);

        CrdtDocument::from_updates(&all_updates)
    }

    fn is_tombstoned(conn: &Connection, id: &str) -> Result<bool> {
        let hit: Option<String> = conn
            .query_row("SELECT id FROM tombstones WHERE id = ?", params![id], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    /// Apply a local edit to a node's attributes: validate against `schema`,
    /// diff via the CRDT layer, persist state + update log + relational row,
    /// re-index full text, diff mentions into `node_references`, bump
    /// `local_revision`, enqueue a sync mutation, and publish a `node.*`
    /// event — all in one transaction (§4.2, §8 scenario S1).
    ///
    /// `extract_mentions` mirrors `permission::NodeCapabilities::extract_mentions`
    /// without depending on `permission.rs` directly, so callers supply the
    /// per-node-type mention extractor appropriate to the projection.
    pub fn apply_node_attributes(
        &self,
        id: &str,
        schema: &Schema,
        new_attributes: &Value,
        user_id: &str,
        extract_mentions: fn(&Value) -> Vec<String>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();

        let existing = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                params![id],
                row_to_node,
            )
            .optional()?;
        let is_new = existing.is_none();

        if Self::is_tombstoned(&conn, id)? {
            return Err(EngineError::Validation(format!(
                "node {id} is tombstoned and cannot be edited"
            )));
        }

        let mut doc = Self::load_node_doc(&conn, id)?;
        let update = doc.update(schema, new_attributes)?;
        let new_local_revision = existing.as_ref().map(|n| n.local_revision).unwrap_or(0) + 1;
        let server_revision = existing.as_ref().map(|n| n.server_revision).unwrap_or(0);
        let created_at = existing.as_ref().map(|n| n.created_at).unwrap_or(now);
        let created_by = existing
            .as_ref()
            .map(|n| n.created_by.clone())
            .unwrap_or_else(|| user_id.to_string());
        let root_id = existing.as_ref().and_then(|n| n.root_id.clone());

        let projection = doc.to_json();
        let parent_id = projection.get("parentId").and_then(Value::as_str).map(str::to_string);

        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO nodes (id, attributes, root_id, local_revision, server_revision, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               attributes = excluded.attributes,
               local_revision = excluded.local_revision,
               updated_at = excluded.updated_at,
               updated_by = excluded.updated_by",
            params![
                id,
                projection.to_string(),
                root_id,
                new_local_revision,
                server_revision,
                created_at,
                created_by,
                now,
                user_id,
            ],
        )?;

        tx.execute(
            "INSERT INTO node_states (node_id, state, revision) VALUES (?, ?, ?)
             ON CONFLICT(node_id) DO UPDATE SET state = excluded.state, revision = excluded.revision",
            params![id, doc.state(), new_local_revision],
        )?;

        if is_new {
            if let Some(parent) = &parent_id {
                bump_counter(&tx, parent, "children_count", 1)?;
            }
        }

        if let Some(update_bytes) = &update {
            tx.execute(
                "INSERT INTO node_updates (node_id, data, created_at) VALUES (?, ?, ?)",
                params![id, update_bytes, now],
            )?;

            let name: String = projection
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            // FTS5 virtual tables have no UPSERT; re-index by delete-then-insert.
            tx.execute("DELETE FROM node_texts WHERE id = ?", params![id])?;
            tx.execute(
                "INSERT INTO node_texts (id, name, attributes) VALUES (?, ?, ?)",
                params![id, name, projection.to_string()],
            )?;

            let mentions = extract_mentions(&projection);
            diff_node_references(&tx, id, &mentions, user_id, now)?;

            let mutation_id = uuid::Uuid::new_v4().to_string();
            queue::enqueue(
                &tx,
                &mutation_id,
                "node.update",
                &serde_json::json!({"nodeId": id}),
            )?;
        }

        tx.commit()?;

        if update.is_some() {
            self.events.publish(if is_new {
                DomainEvent::NodeCreated {
                    workspace_id: self.workspace_id.clone(),
                    node_id: id.to_string(),
                }
            } else {
                DomainEvent::NodeUpdated {
                    workspace_id: self.workspace_id.clone(),
                    node_id: id.to_string(),
                }
            });
        }

        Ok(())
    }

    /// Apply a local edit to a document's content: analogous to
    /// `apply_node_attributes`, for the collaborative body owned by a
    /// page/record node (§4.2).
    pub fn apply_document_content(
        &self,
        id: &str,
        schema: &Schema,
        new_content: &Value,
        user_id: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();

        let node_exists: bool = conn
            .query_row("SELECT 1 FROM nodes WHERE id = ?", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if !node_exists {
            return Err(EngineError::NotFound(format!(
                "node {id} does not exist for document content"
            )));
        }

        if Self::is_tombstoned(&conn, id)? {
            return Err(EngineError::Validation(format!(
                "document {id} is tombstoned and cannot be edited"
            )));
        }

        let existing = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"),
                params![id],
                row_to_document,
            )
            .optional()?;
        let is_new = existing.is_none();

        let mut doc = Self::load_document_doc(&conn, id)?;
        let update = doc.update(schema, new_content)?;
        let new_local_revision = existing.as_ref().map(|d| d.local_revision).unwrap_or(0) + 1;
        let server_revision = existing.as_ref().map(|d| d.server_revision).unwrap_or(0);
        let created_at = existing.as_ref().map(|d| d.created_at).unwrap_or(now);
        let created_by = existing
            .as_ref()
            .map(|d| d.created_by.clone())
            .unwrap_or_else(|| user_id.to_string());

        let projection = doc.to_json();

        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO documents (id, content, local_revision, server_revision, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               content = excluded.content,
               local_revision = excluded.local_revision,
               updated_at = excluded.updated_at,
               updated_by = excluded.updated_by",
            params![
                id,
                projection.to_string(),
                new_local_revision,
                server_revision,
                created_at,
                created_by,
                now,
                user_id,
            ],
        )?;

        tx.execute(
            "INSERT INTO document_states (document_id, state, revision) VALUES (?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET state = excluded.state, revision = excluded.revision",
            params![id, doc.state(), new_local_revision],
        )?;

        if let Some(update_bytes) = &update {
            tx.execute(
                "INSERT INTO document_updates (document_id, data, created_at) VALUES (?, ?, ?)",
                params![id, update_bytes, now],
            )?;

            let text = extract_document_text(&projection);
            tx.execute("DELETE FROM document_texts WHERE id = ?", params![id])?;
            tx.execute(
                "INSERT INTO document_texts (id, text) VALUES (?, ?)",
                params![id, text],
            )?;

            let mutation_id = uuid::Uuid::new_v4().to_string();
            queue::enqueue(
                &tx,
                &mutation_id,
                "document.update",
                &serde_json::json!({"documentId": id}),
            )?;
        }

        tx.commit()?;

        if update.is_some() {
            // Document content is rendered as part of its owning node, so it
            // shares the node.* event family rather than minting its own
            // document.* events (§4.7 lists no document-specific events).
            self.events.publish(if is_new {
                DomainEvent::NodeCreated {
                    workspace_id: self.workspace_id.clone(),
                    node_id: id.to_string(),
                }
            } else {
                DomainEvent::NodeUpdated {
                    workspace_id: self.workspace_id.clone(),
                    node_id: id.to_string(),
                }
            });
        }

        Ok(())
    }

    /// Merge an authoritative node record from the server. Drops the update
    /// if a tombstone already exists for this id (§4.2, §8 property 5).
    pub fn apply_remote_node(&self, remote: RemoteNode) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();

        if Self::is_tombstoned(&conn, &remote.id)? {
            return Ok(());
        }

        let existing_revision: Option<i64> = conn
            .query_row(
                "SELECT local_revision FROM nodes WHERE id = ?",
                params![remote.id],
                |row| row.get(0),
            )
            .optional()?;
        let is_new = existing_revision.is_none();
        let local_revision = existing_revision.unwrap_or(0);

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO nodes (id, attributes, root_id, local_revision, server_revision, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               attributes = excluded.attributes,
               server_revision = excluded.server_revision,
               updated_at = excluded.updated_at,
               updated_by = excluded.updated_by",
            params![
                remote.id,
                remote.attributes.to_string(),
                remote.root_id,
                local_revision.max(remote.server_revision),
                remote.server_revision,
                remote.created_at,
                remote.created_by,
                remote.updated_at,
                remote.updated_by,
            ],
        )?;

        let name = remote
            .attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tx.execute("DELETE FROM node_texts WHERE id = ?", params![remote.id])?;
        tx.execute(
            "INSERT INTO node_texts (id, name, attributes) VALUES (?, ?, ?)",
            params![remote.id, name, remote.attributes.to_string()],
        )?;

        tx.commit()?;

        self.events.publish(if is_new {
            DomainEvent::NodeCreated {
                workspace_id: self.workspace_id.clone(),
                node_id: remote.id.clone(),
            }
        } else {
            DomainEvent::NodeUpdated {
                workspace_id: self.workspace_id.clone(),
                node_id: remote.id.clone(),
            }
        });

        Ok(())
    }

    /// Merge an incremental CRDT update from the server into a node that
    /// already exists locally, distinct from `apply_remote_node`'s full
    /// record replace (§4.2 `applyRemoteNodeUpdate`). Re-snapshots
    /// `node_states` at the merged revision and drops the pending local
    /// `node_updates` the snapshot now absorbs.
    pub fn apply_remote_node_update(&self, node_id: &str, update: &[u8], server_revision: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();

        if Self::is_tombstoned(&conn, node_id)? {
            return Ok(());
        }

        let exists: bool = conn
            .query_row("SELECT 1 FROM nodes WHERE id = ?", params![node_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(EngineError::NotFound(format!(
                "node {node_id} does not exist for remote update"
            )));
        }

        let mut doc = Self::load_node_doc(&conn, node_id)?;
        doc.apply_update(update, UpdateOrigin::Sync)?;
        let now = Utc::now().timestamp_millis();
        let projection = doc.to_json();

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE nodes SET attributes = ?, server_revision = ?, local_revision = MAX(local_revision, ?), updated_at = ? WHERE id = ?",
            params![projection.to_string(), server_revision, server_revision, now, node_id],
        )?;
        tx.execute(
            "INSERT INTO node_states (node_id, state, revision) VALUES (?, ?, ?)
             ON CONFLICT(node_id) DO UPDATE SET state = excluded.state, revision = excluded.revision",
            params![node_id, doc.state(), server_revision],
        )?;
        // The merged snapshot already absorbs every update folded into it.
        tx.execute("DELETE FROM node_updates WHERE node_id = ?", params![node_id])?;

        let name = projection.get("name").and_then(Value::as_str).unwrap_or_default();
        tx.execute("DELETE FROM node_texts WHERE id = ?", params![node_id])?;
        tx.execute(
            "INSERT INTO node_texts (id, name, attributes) VALUES (?, ?, ?)",
            params![node_id, name, projection.to_string()],
        )?;
        tx.commit()?;

        self.events.publish(DomainEvent::NodeUpdated {
            workspace_id: self.workspace_id.clone(),
            node_id: node_id.to_string(),
        });

        Ok(())
    }

    /// Merge an authoritative document record from the server, analogous to `apply_remote_node`.
    pub fn apply_remote_document(&self, remote: RemoteDocument) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();

        if Self::is_tombstoned(&conn, &remote.id)? {
            return Ok(());
        }

        let local_revision: i64 = conn
            .query_row(
                "SELECT local_revision FROM documents WHERE id = ?",
                params![remote.id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (id, content, local_revision, server_revision, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               content = excluded.content,
               server_revision = excluded.server_revision,
               updated_at = excluded.updated_at,
               updated_by = excluded.updated_by",
            params![
                remote.id,
                remote.content.to_string(),
                local_revision.max(remote.server_revision),
                remote.server_revision,
                remote.created_at,
                remote.created_by,
                remote.updated_at,
                remote.updated_by,
            ],
        )?;

        let text = extract_document_text(&remote.content);
        tx.execute("DELETE FROM document_texts WHERE id = ?", params![remote.id])?;
        tx.execute(
            "INSERT INTO document_texts (id, text) VALUES (?, ?)",
            params![remote.id, text],
        )?;
        tx.commit()?;

        self.events.publish(DomainEvent::NodeUpdated {
            workspace_id: self.workspace_id.clone(),
            node_id: remote.id.clone(),
        });

        Ok(())
    }

    /// Merge an incremental CRDT update from the server into a document's
    /// content, analogous to `apply_remote_node_update` (§4.2 `applyRemoteDocumentUpdate`).
    pub fn apply_remote_document_update(
        &self,
        document_id: &str,
        update: &[u8],
        server_revision: i64,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();

        if Self::is_tombstoned(&conn, document_id)? {
            return Ok(());
        }

        let exists: bool = conn
            .query_row("SELECT 1 FROM documents WHERE id = ?", params![document_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(EngineError::NotFound(format!(
                "document {document_id} does not exist for remote update"
            )));
        }

        let mut doc = Self::load_document_doc(&conn, document_id)?;
        doc.apply_update(update, UpdateOrigin::Sync)?;
        let now = Utc::now().timestamp_millis();
        let projection = doc.to_json();

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE documents SET content = ?, server_revision = ?, local_revision = MAX(local_revision, ?), updated_at = ? WHERE id = ?",
            params![projection.to_string(), server_revision, server_revision, now, document_id],
        )?;
        tx.execute(
            "INSERT INTO document_states (document_id, state, revision) VALUES (?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET state = excluded.state, revision = excluded.revision",
            params![document_id, doc.state(), server_revision],
        )?;
        tx.execute("DELETE FROM document_updates WHERE document_id = ?", params![document_id])?;

        let text = extract_document_text(&projection);
        tx.execute("DELETE FROM document_texts WHERE id = ?", params![document_id])?;
        tx.execute(
            "INSERT INTO document_texts (id, text) VALUES (?, ?)",
            params![document_id, text],
        )?;
        tx.commit()?;

        self.events.publish(DomainEvent::NodeUpdated {
            workspace_id: self.workspace_id.clone(),
            node_id: document_id.to_string(),
        });

        Ok(())
    }

    /// Delete the node and insert a tombstone, atomically. Once tombstoned,
    /// a node id is permanently shadowed from resurrection by later remote
    /// updates (§8 property 5).
    pub fn create_tombstone(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();

        let existing = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                params![id],
                row_to_node,
            )
            .optional()?;
        let snapshot = existing.as_ref().map(|n| n.attributes.to_string());
        let parent_id = existing.as_ref().and_then(|n| n.parent_id.clone());

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM nodes WHERE id = ?", params![id])?;
        tx.execute("DELETE FROM node_texts WHERE id = ?", params![id])?;
        tx.execute("DELETE FROM document_texts WHERE id = ?", params![id])?;
        tx.execute(
            "INSERT OR REPLACE INTO tombstones (id, data, deleted_at) VALUES (?, ?, ?)",
            params![id, snapshot, now],
        )?;
        if let Some(parent) = &parent_id {
            bump_counter(&tx, parent, "children_count", -1)?;
        }
        tx.commit()?;

        if existing.is_some() {
            self.events.publish(DomainEvent::NodeDeleted {
                workspace_id: self.workspace_id.clone(),
                node_id: id.to_string(),
            });
        }

        Ok(())
    }

    /// Record (or refresh) a reaction. A collaborator never has the same
    /// reaction twice on a node, since `(node_id, collaborator_id, reaction)`
    /// is the primary key (§3 `NodeReaction`).
    pub fn add_reaction(&self, node_id: &str, collaborator_id: &str, reaction: &str, created_at: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO node_reactions (node_id, collaborator_id, reaction, created_at, revision)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(node_id, collaborator_id, reaction) DO NOTHING",
            params![node_id, collaborator_id, reaction, created_at],
        )?;
        Ok(())
    }

    /// Remove a reaction, if present.
    pub fn remove_reaction(&self, node_id: &str, collaborator_id: &str, reaction: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM node_reactions WHERE node_id = ? AND collaborator_id = ? AND reaction = ?",
            params![node_id, collaborator_id, reaction],
        )?;
        Ok(())
    }

    /// Count of a given reaction on a node.
    pub fn reaction_count(&self, node_id: &str, reaction: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM node_reactions WHERE node_id = ? AND reaction = ?",
            params![node_id, reaction],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Record that a collaborator saw (and optionally opened) a node,
    /// upserting the interaction row's first/last-seen and first/last-opened
    /// timestamps (§3 `NodeInteraction`).
    pub fn record_interaction(&self, node_id: &str, collaborator_id: &str, opened: bool, at: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let opened_at = if opened { Some(at) } else { None };
        conn.execute(
            "INSERT INTO node_interactions (node_id, collaborator_id, first_seen_at, last_seen_at, first_opened_at, last_opened_at, revision)
             VALUES (?, ?, ?, ?, ?, ?, 1)
             ON CONFLICT(node_id, collaborator_id) DO UPDATE SET
               last_seen_at = MAX(last_seen_at, excluded.last_seen_at),
               first_opened_at = COALESCE(first_opened_at, excluded.first_opened_at),
               last_opened_at = COALESCE(excluded.last_opened_at, last_opened_at),
               revision = revision + 1",
            params![node_id, collaborator_id, at, at, opened_at, opened_at],
        )?;
        Ok(())
    }

    /// Current value of a named counter on a node (0 if never bumped).
    pub fn counter_value(&self, node_id: &str, counter_type: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM node_counters WHERE node_id = ? AND type = ?",
                params![node_id, counter_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    /// Sum of `attributes.size` over file nodes created by `user_id` (§8 scenario S6).
    pub fn user_storage_used(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(json_extract(attributes, '$.size')) FROM nodes
             WHERE type = 'file' AND created_by = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    /// Current cursor value for a synchronizer stream. `None` if never advanced.
    pub fn get_cursor(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM cursors WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Advance a stream's cursor. Only called after the batch up to this
    /// value has been fully applied (§4.4 pull protocol, §8 property 6).
    pub fn set_cursor(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO cursors (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now, now],
        )?;
        Ok(())
    }
}

fn bump_counter(conn: &Connection, node_id: &str, counter_type: &str, delta: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO node_counters (node_id, type, value) VALUES (?, ?, ?)
         ON CONFLICT(node_id, type) DO UPDATE SET value = value + excluded.value",
        params![node_id, counter_type, delta],
    )?;
    Ok(())
}

/// Diff `mentions` against the node's existing `node_references` rows,
/// deleting stale ones and inserting new ones (§4.2 `applyNodeAttributes`:
/// "diff mentions and update `node_references`").
fn diff_node_references(conn: &Connection, node_id: &str, mentions: &[String], user_id: &str, now: i64) -> Result<()> {
    let existing: Vec<String> = {
        let mut stmt = conn.prepare("SELECT reference_id FROM node_references WHERE node_id = ?")?;
        stmt.query_map(params![node_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect()
    };

    for old_ref in &existing {
        if !mentions.iter().any(|m| m == old_ref) {
            conn.execute(
                "DELETE FROM node_references WHERE node_id = ? AND reference_id = ?",
                params![node_id, old_ref],
            )?;
        }
    }

    for reference_id in mentions {
        if !existing.iter().any(|e| e == reference_id) {
            conn.execute(
                "INSERT OR IGNORE INTO node_references (node_id, reference_id, inner_id, type, created_at, created_by)
                 VALUES (?, ?, '', 'mention', ?, ?)",
                params![node_id, reference_id, now, user_id],
            )?;
        }
    }

    Ok(())
}

fn extract_document_text(content: &Value) -> String {
    content.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> WorkspaceStore {
        WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap()
    }

    fn no_mentions(_: &Value) -> Vec<String> {
        Vec::new()
    }

    fn page_schema() -> Schema {
        Schema::Object(vec![
            ("type".into(), Schema::Primitive),
            ("parentId".into(), Schema::Primitive),
            ("name".into(), Schema::Text),
        ])
    }

    #[test]
    fn apply_node_attributes_creates_and_then_updates_a_node() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "space1", "name": "Hello"}),
                "user1",
                no_mentions,
            )
            .unwrap();

        let node = store.fetch_node("node1").unwrap().unwrap();
        assert_eq!(node.node_type, "page");
        assert_eq!(node.parent_id.as_deref(), Some("space1"));
        assert_eq!(node.local_revision, 1);
        assert_eq!(node.server_revision, 0);

        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "space1", "name": "Hello world"}),
                "user1",
                no_mentions,
            )
            .unwrap();

        let node = store.fetch_node("node1").unwrap().unwrap();
        assert_eq!(node.local_revision, 2);
        assert_eq!(node.attributes["name"], json!("Hello world"));
    }

    #[test]
    fn apply_node_attributes_enqueues_a_mutation() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "space1", "name": "Hello"}),
                "user1",
                no_mentions,
            )
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let pending = queue::list_all(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].mutation_type, "node.update");
    }

    /// §8 Scenario S1: a local page edit must publish a `node.updated` event.
    #[test]
    fn apply_node_attributes_publishes_node_updated_on_an_existing_node() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        store.events.subscribe(move |event| {
            if let DomainEvent::NodeUpdated { node_id, .. } = event {
                received2.lock().unwrap().push(node_id.clone());
            }
        });

        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "B"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        assert_eq!(*received.lock().unwrap(), vec!["node1"]);
    }

    #[test]
    fn apply_node_attributes_publishes_node_created_for_a_brand_new_node() {
        let store = test_store();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        store.events.subscribe(move |event| {
            if let DomainEvent::NodeCreated { node_id, .. } = event {
                received2.lock().unwrap().push(node_id.clone());
            }
        });

        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        assert_eq!(*received.lock().unwrap(), vec!["node1"]);
    }

    #[test]
    fn create_tombstone_publishes_node_deleted_only_if_the_node_existed() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        store.events.subscribe(move |event| {
            if let DomainEvent::NodeDeleted { node_id, .. } = event {
                received2.lock().unwrap().push(node_id.clone());
            }
        });

        store.create_tombstone("missing").unwrap();
        assert!(received.lock().unwrap().is_empty());

        store.create_tombstone("node1").unwrap();
        assert_eq!(*received.lock().unwrap(), vec!["node1"]);
    }

    #[test]
    fn mentions_are_diffed_into_node_references() {
        let store = test_store();
        let extract = |v: &Value| -> Vec<String> {
            v.get("mentions")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        let schema = Schema::Object(vec![
            ("type".into(), Schema::Primitive),
            ("parentId".into(), Schema::Primitive),
            ("name".into(), Schema::Text),
            ("mentions".into(), Schema::Array(Box::new(Schema::Primitive))),
        ]);

        store
            .apply_node_attributes(
                "node1",
                &schema,
                &json!({"type": "page", "parentId": "sp1", "name": "A", "mentions": ["node2", "node3"]}),
                "u1",
                extract,
            )
            .unwrap();

        let backlinks = store.backlinks("node2").unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].node_id, "node1");

        store
            .apply_node_attributes(
                "node1",
                &schema,
                &json!({"type": "page", "parentId": "sp1", "name": "A", "mentions": ["node3"]}),
                "u1",
                extract,
            )
            .unwrap();

        assert!(store.backlinks("node2").unwrap().is_empty());
        assert_eq!(store.backlinks("node3").unwrap().len(), 1);
    }

    #[test]
    fn children_count_tracks_creation_and_tombstoning() {
        let store = test_store();
        store
            .apply_node_attributes(
                "space1",
                &page_schema(),
                &json!({"type": "space", "parentId": Value::Null, "name": "Space"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        store
            .apply_node_attributes(
                "child1",
                &page_schema(),
                &json!({"type": "page", "parentId": "space1", "name": "Child"}),
                "u1",
                no_mentions,
            )
            .unwrap();
        assert_eq!(store.counter_value("space1", "children_count").unwrap(), 1);

        store.create_tombstone("child1").unwrap();
        assert_eq!(store.counter_value("space1", "children_count").unwrap(), 0);
    }

    #[test]
    fn tombstone_dominates_a_later_remote_update() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "space1", "name": "Hello"}),
                "user1",
                no_mentions,
            )
            .unwrap();
        store.create_tombstone("node1").unwrap();

        store
            .apply_remote_node(RemoteNode {
                id: "node1".into(),
                root_id: Some("space1".into()),
                attributes: json!({"type": "page", "parentId": "space1", "name": "Resurrected"}),
                server_revision: 5,
                created_at: 0,
                created_by: "user1".into(),
                updated_at: 0,
                updated_by: "user1".into(),
            })
            .unwrap();

        assert!(store.fetch_node("node1").unwrap().is_none());
    }

    #[test]
    fn descendants_are_found_transitively() {
        let store = test_store();
        store
            .apply_node_attributes(
                "folder1",
                &page_schema(),
                &json!({"type": "folder", "parentId": "space1", "name": "F"}),
                "user1",
                no_mentions,
            )
            .unwrap();
        store
            .apply_node_attributes(
                "page1",
                &page_schema(),
                &json!({"type": "page", "parentId": "folder1", "name": "P"}),
                "user1",
                no_mentions,
            )
            .unwrap();

        let descendants = store.fetch_descendants("space1").unwrap();
        let ids: Vec<&str> = descendants.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"folder1"));
        assert!(ids.contains(&"page1"));
    }

    #[test]
    fn storage_used_sums_file_sizes_for_one_user() {
        let store = test_store();
        let file_schema = Schema::Object(vec![
            ("type".into(), Schema::Primitive),
            ("parentId".into(), Schema::Primitive),
            ("size".into(), Schema::Primitive),
        ]);

        for (id, size) in [("f1", 1000), ("f2", 2500)] {
            store
                .apply_node_attributes(id, &file_schema, &json!({"type": "file", "parentId": "space1", "size": size}), "u1", no_mentions)
                .unwrap();
        }
        store
            .apply_node_attributes(
                "f3",
                &file_schema,
                &json!({"type": "file", "parentId": "space1", "size": Value::Null}),
                "u2",
                no_mentions,
            )
            .unwrap();

        assert_eq!(store.user_storage_used("u1").unwrap(), 3500);
    }

    #[test]
    fn cursor_round_trips_and_starts_absent() {
        let store = test_store();
        assert!(store.get_cursor("nodes-updates").unwrap().is_none());
        store.set_cursor("nodes-updates", "42").unwrap();
        assert_eq!(store.get_cursor("nodes-updates").unwrap().unwrap(), "42");
    }

    fn document_schema() -> Schema {
        Schema::Object(vec![
            ("type".into(), Schema::Primitive),
            ("text".into(), Schema::Text),
        ])
    }

    #[test]
    fn apply_document_content_requires_a_backing_node() {
        let store = test_store();
        let err = store
            .apply_document_content("node1", &document_schema(), &json!({"type": "page", "text": "hi"}), "u1")
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn apply_document_content_creates_and_updates_a_document() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        store
            .apply_document_content("node1", &document_schema(), &json!({"type": "page", "text": "hello"}), "u1")
            .unwrap();
        let doc = store.fetch_document("node1").unwrap().unwrap();
        assert_eq!(doc.local_revision, 1);
        assert_eq!(doc.content["text"], json!("hello"));

        store
            .apply_document_content("node1", &document_schema(), &json!({"type": "page", "text": "hello world"}), "u1")
            .unwrap();
        let doc = store.fetch_document("node1").unwrap().unwrap();
        assert_eq!(doc.local_revision, 2);
        assert_eq!(doc.content["text"], json!("hello world"));
    }

    #[test]
    fn apply_remote_node_update_merges_an_incremental_update_and_clears_pending_local_updates() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        let mut remote_doc = {
            let conn = store.conn.lock().unwrap();
            WorkspaceStore::load_node_doc(&conn, "node1").unwrap()
        };
        let update = remote_doc
            .update(&page_schema(), &json!({"type": "page", "parentId": "sp1", "name": "B"}))
            .unwrap()
            .unwrap();

        store.apply_remote_node_update("node1", &update, 9).unwrap();

        let node = store.fetch_node("node1").unwrap().unwrap();
        assert_eq!(node.attributes["name"], json!("B"));
        assert_eq!(node.server_revision, 9);

        let conn = store.conn.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM node_updates WHERE node_id = 'node1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn reactions_are_unique_per_collaborator_and_removable() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        store.add_reaction("node1", "u1", "heart", 1).unwrap();
        store.add_reaction("node1", "u1", "heart", 2).unwrap();
        assert_eq!(store.reaction_count("node1", "heart").unwrap(), 1);

        store.add_reaction("node1", "u2", "heart", 3).unwrap();
        assert_eq!(store.reaction_count("node1", "heart").unwrap(), 2);

        store.remove_reaction("node1", "u1", "heart").unwrap();
        assert_eq!(store.reaction_count("node1", "heart").unwrap(), 1);
    }

    #[test]
    fn interactions_track_first_and_last_seen_and_opened() {
        let store = test_store();
        store
            .apply_node_attributes(
                "node1",
                &page_schema(),
                &json!({"type": "page", "parentId": "sp1", "name": "A"}),
                "u1",
                no_mentions,
            )
            .unwrap();

        store.record_interaction("node1", "u1", false, 10).unwrap();
        store.record_interaction("node1", "u1", true, 20).unwrap();

        let conn = store.conn.lock().unwrap();
        let (first_seen, last_seen, first_opened, last_opened): (i64, i64, Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT first_seen_at, last_seen_at, first_opened_at, last_opened_at FROM node_interactions WHERE node_id = 'node1' AND collaborator_id = 'u1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(first_seen, 10);
        assert_eq!(last_seen, 20);
        assert_eq!(first_opened, Some(20));
        assert_eq!(last_opened, Some(20));
    }
}
