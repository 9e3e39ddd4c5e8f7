//! Mutation queue (§4.3): a durable, ordered record of local intents to
//! replay to the server.
//!
//! Lives as a table in the same workspace database as the entities it
//! mutates, so `enqueue` can run inside the same transaction as the store
//! write it represents (§3 `Mutation`, §4.3 contract).

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::error::Result;

/// DDL for the mutation queue table. Executed once by the owning store's
/// schema initialization.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutations (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    dead_letter INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_mutations_created_at ON mutations(created_at);
"#;

/// One queued mutation (§3 `Mutation`).
#[derive(Debug, Clone)]
pub struct Mutation {
    pub id: String,
    pub mutation_type: String,
    pub data: Value,
    pub created_at: i64,
    pub retries: u32,
    pub dead_letter: bool,
}

fn row_to_mutation(row: &Row) -> rusqlite::Result<Mutation> {
    let data_text: String = row.get(2)?;
    Ok(Mutation {
        id: row.get(0)?,
        mutation_type: row.get(1)?,
        data: serde_json::from_str(&data_text).unwrap_or(Value::Null),
        created_at: row.get(3)?,
        retries: row.get::<_, i64>(4)? as u32,
        dead_letter: row.get::<_, i64>(5)? != 0,
    })
}

/// Enqueue a mutation. Meant to be called inside the same transaction as
/// the write it represents, so a crash never leaves one without the other
/// (§8 property 4, mutation durability).
pub fn enqueue(conn: &Connection, id: &str, mutation_type: &str, data: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO mutations (id, type, data, created_at, retries, dead_letter)
         VALUES (?, ?, ?, ?, 0, 0)",
        params![id, mutation_type, data.to_string(), Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// The oldest non-dead-lettered mutation, in `createdAt` order.
pub fn peek_head(conn: &Connection) -> Result<Option<Mutation>> {
    conn.query_row(
        "SELECT id, type, data, created_at, retries, dead_letter FROM mutations
         WHERE dead_letter = 0 ORDER BY created_at ASC LIMIT 1",
        [],
        row_to_mutation,
    )
    .optional()
    .map_err(Into::into)
}

/// All mutations in `createdAt` order, including dead-lettered ones (for diagnostics).
pub fn list_all(conn: &Connection) -> Result<Vec<Mutation>> {
    let mut stmt = conn.prepare(
        "SELECT id, type, data, created_at, retries, dead_letter FROM mutations ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map([], row_to_mutation)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Acknowledge success: remove the mutation.
pub fn ack(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM mutations WHERE id = ?", params![id])?;
    Ok(())
}

/// Record a transient failure: bump the retry count, and dead-letter once
/// `ceiling` is exceeded (§4.3).
pub fn record_failure(conn: &Connection, id: &str, ceiling: u32) -> Result<bool> {
    conn.execute(
        "UPDATE mutations SET retries = retries + 1 WHERE id = ?",
        params![id],
    )?;
    let retries: i64 = conn.query_row(
        "SELECT retries FROM mutations WHERE id = ?",
        params![id],
        |row| row.get(0),
    )?;
    let dead_lettered = retries as u32 > ceiling;
    if dead_lettered {
        conn.execute(
            "UPDATE mutations SET dead_letter = 1 WHERE id = ?",
            params![id],
        )?;
    }
    Ok(dead_lettered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    #[test]
    fn enqueue_and_peek_returns_oldest_first() {
        let conn = setup();
        enqueue(&conn, "m1", "node.update", &Value::Null).unwrap();
        enqueue(&conn, "m2", "node.update", &Value::Null).unwrap();

        let head = peek_head(&conn).unwrap().unwrap();
        assert_eq!(head.id, "m1");
    }

    #[test]
    fn ack_removes_the_mutation() {
        let conn = setup();
        enqueue(&conn, "m1", "node.update", &Value::Null).unwrap();
        ack(&conn, "m1").unwrap();
        assert!(peek_head(&conn).unwrap().is_none());
    }

    #[test]
    fn record_failure_dead_letters_past_the_ceiling() {
        let conn = setup();
        enqueue(&conn, "m1", "node.update", &Value::Null).unwrap();

        for _ in 0..3 {
            assert!(!record_failure(&conn, "m1", 3).unwrap());
        }
        assert!(record_failure(&conn, "m1", 3).unwrap());

        // Dead-lettered mutations are no longer the queue head.
        assert!(peek_head(&conn).unwrap().is_none());
        assert_eq!(list_all(&conn).unwrap().len(), 1);
    }

    #[test]
    fn queue_preserves_createdat_order_across_many_entries() {
        let conn = setup();
        for i in 0..5 {
            enqueue(&conn, &format!("m{i}"), "node.update", &Value::Null).unwrap();
        }
        let all = list_all(&conn).unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4"]);
    }
}
