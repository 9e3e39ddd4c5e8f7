//! Synchronizer (§4.4): drains the local mutation queue to the server and
//! pulls authoritative updates back in, one independent stream per entity
//! kind, each with its own cursor and failure handling.
//!
//! The wire transport is abstracted behind [`SyncTransport`] so this module
//! can be exercised without a live socket — the same split the teacher
//! codebase uses between its reconnect-loop driver (`socket.rs`) and the
//! actual `tokio-tungstenite` stream it drives.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BackoffConfig;
use crate::error::{EngineError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::queue::{self, Mutation};
use crate::store::{RemoteDocument, RemoteNode, WorkspaceStore};

/// One batch of authoritative records pulled from the server for a stream,
/// plus the cursor value to persist once the whole batch has been applied.
pub struct PullBatch {
    pub records: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// Wire operations the synchronizer needs. Implemented by the real socket
/// transport in the host shell; mocked in tests.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Push one mutation. `Ok(())` acknowledges it; `Err` signals retry/dead-letter handling.
    async fn push_mutation(&self, mutation: &Mutation) -> Result<()>;

    /// Pull records for `stream` newer than `cursor` (`None` means "from the start").
    async fn pull(&self, stream: &str, cursor: Option<&str>) -> Result<PullBatch>;
}

/// Streams pulled independently, each with their own cursor (§4.4).
pub const STREAMS: &[&str] = &[
    "nodes-updates",
    "node-reactions",
    "node-interactions",
    "node-tombstones",
    "collaborations",
    "users",
    "document-updates",
];

/// Drives the push and pull halves of synchronization for one workspace.
pub struct Synchronizer<T: SyncTransport> {
    transport: T,
    backoff: BackoffConfig,
    events: std::sync::Arc<EventBus>,
}

impl<T: SyncTransport> Synchronizer<T> {
    pub fn new(transport: T, backoff: BackoffConfig, events: std::sync::Arc<EventBus>) -> Self {
        Self {
            transport,
            backoff,
            events,
        }
    }

    /// Drain the mutation queue one item at a time until it's empty or the
    /// head mutation fails. Stopping on the first failure (rather than
    /// skipping ahead) preserves per-stream ordering (§4.3, §4.4).
    pub async fn push_pending(
        &self,
        store: &WorkspaceStore,
        workspace_id: &str,
        retry_ceiling: u32,
    ) -> Result<usize> {
        let mut pushed = 0;
        loop {
            let head = store.with_connection(queue::peek_head)?;
            let Some(mutation) = head else {
                break;
            };

            match self.transport.push_mutation(&mutation).await {
                Ok(()) => {
                    store.with_connection(|conn| queue::ack(conn, &mutation.id))?;
                    self.events.publish(DomainEvent::MutationCompleted {
                        workspace_id: workspace_id.to_string(),
                        mutation_id: mutation.id.clone(),
                    });
                    pushed += 1;
                }
                Err(err) if is_retryable(&err) => {
                    let dead_lettered = store.with_connection(|conn| {
                        queue::record_failure(conn, &mutation.id, retry_ceiling)
                    })?;
                    if dead_lettered {
                        self.events.publish(DomainEvent::MutationFailed {
                            workspace_id: workspace_id.to_string(),
                            mutation_id: mutation.id.clone(),
                            reason: err.to_string(),
                        });
                    }
                    return Ok(pushed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(pushed)
    }

    /// Pull one stream forward from its persisted cursor. Applies each
    /// record in order and advances the cursor only after the whole batch
    /// commits, so a crash mid-batch simply re-pulls the same range next
    /// time (§4.4, §8 property 6: cursor monotonicity).
    pub async fn pull_stream<F>(
        &self,
        store: &WorkspaceStore,
        stream: &str,
        mut apply: F,
    ) -> Result<usize>
    where
        F: FnMut(&WorkspaceStore, &Value) -> Result<()>,
    {
        let cursor = store.get_cursor(stream)?;
        let batch = self.transport.pull(stream, cursor.as_deref()).await?;
        let count = batch.records.len();

        for record in &batch.records {
            apply(store, record)?;
        }

        if let Some(next) = batch.next_cursor {
            store.set_cursor(stream, &next)?;
        }
        Ok(count)
    }

    /// Run one push+pull cycle over every stream, returning per-stream
    /// failures rather than aborting the whole cycle on the first one
    /// (§4.4: "each stream fails independently").
    pub async fn run_cycle(
        &self,
        store: &WorkspaceStore,
        workspace_id: &str,
        retry_ceiling: u32,
    ) -> CycleReport {
        let push_result = self.push_pending(store, workspace_id, retry_ceiling).await;

        let mut pull_results = Vec::with_capacity(STREAMS.len());
        for stream in STREAMS {
            let result = self
                .pull_stream(store, stream, |store, record| apply_pulled_record(store, stream, record))
                .await;
            pull_results.push((stream.to_string(), result));
        }

        CycleReport {
            push_result,
            pull_results,
        }
    }

    pub fn next_backoff_delay(&self, attempt: u32) -> std::time::Duration {
        self.backoff.delay(attempt)
    }
}

/// Outcome of one synchronization cycle across all streams.
pub struct CycleReport {
    pub push_result: Result<usize>,
    pub pull_results: Vec<(String, Result<usize>)>,
}

impl CycleReport {
    pub fn all_succeeded(&self) -> bool {
        self.push_result.is_ok() && self.pull_results.iter().all(|(_, r)| r.is_ok())
    }
}

fn is_retryable(err: &EngineError) -> bool {
    matches!(err, EngineError::TransientNetwork(_) | EngineError::Io(_))
}

fn field_str<'a>(record: &'a Value, name: &str) -> Result<&'a str> {
    record
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation(format!("pulled record missing '{name}'")))
}

fn field_i64(record: &Value, name: &str) -> Result<i64> {
    record
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::Validation(format!("pulled record missing '{name}'")))
}

fn field_bytes(record: &Value, name: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    let encoded = field_str(record, name)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| EngineError::Validation(format!("invalid base64 in '{name}': {e}")))
}

/// Route one pulled record to the store operation that matches its stream
/// (§4.2 "applies each entry via §4.2 inside a transaction"). `collaborations`
/// and `users` streams carry account-level data outside `WorkspaceStore`'s
/// scope (see DESIGN.md's "Collaboration table cardinality" decision) and
/// are intentionally no-ops here rather than silent stubs.
fn apply_pulled_record(store: &WorkspaceStore, stream: &str, record: &Value) -> Result<()> {
    match stream {
        "nodes-updates" => apply_node_stream_record(store, record),
        "document-updates" => apply_document_stream_record(store, record),
        "node-reactions" => apply_reaction_record(store, record),
        "node-interactions" => apply_interaction_record(store, record),
        "node-tombstones" => apply_tombstone_record(store, record),
        "collaborations" | "users" => Ok(()),
        other => Err(EngineError::Validation(format!("unknown sync stream '{other}'"))),
    }
}

fn apply_node_stream_record(store: &WorkspaceStore, record: &Value) -> Result<()> {
    match field_str(record, "op")? {
        "full" => store.apply_remote_node(RemoteNode {
            id: field_str(record, "id")?.to_string(),
            root_id: record.get("rootId").and_then(Value::as_str).map(str::to_string),
            attributes: record.get("attributes").cloned().unwrap_or(Value::Null),
            server_revision: field_i64(record, "serverRevision")?,
            created_at: field_i64(record, "createdAt")?,
            created_by: field_str(record, "createdBy")?.to_string(),
            updated_at: field_i64(record, "updatedAt")?,
            updated_by: field_str(record, "updatedBy")?.to_string(),
        }),
        "update" => {
            let update = field_bytes(record, "update")?;
            store.apply_remote_node_update(
                field_str(record, "id")?,
                &update,
                field_i64(record, "serverRevision")?,
            )
        }
        other => Err(EngineError::Validation(format!("unknown node stream op '{other}'"))),
    }
}

fn apply_document_stream_record(store: &WorkspaceStore, record: &Value) -> Result<()> {
    match field_str(record, "op")? {
        "full" => store.apply_remote_document(RemoteDocument {
            id: field_str(record, "id")?.to_string(),
            content: record.get("content").cloned().unwrap_or(Value::Null),
            server_revision: field_i64(record, "serverRevision")?,
            created_at: field_i64(record, "createdAt")?,
            created_by: field_str(record, "createdBy")?.to_string(),
            updated_at: field_i64(record, "updatedAt")?,
            updated_by: field_str(record, "updatedBy")?.to_string(),
        }),
        "update" => {
            let update = field_bytes(record, "update")?;
            store.apply_remote_document_update(
                field_str(record, "id")?,
                &update,
                field_i64(record, "serverRevision")?,
            )
        }
        other => Err(EngineError::Validation(format!("unknown document stream op '{other}'"))),
    }
}

fn apply_reaction_record(store: &WorkspaceStore, record: &Value) -> Result<()> {
    let node_id = field_str(record, "nodeId")?;
    let collaborator_id = field_str(record, "collaboratorId")?;
    let reaction = field_str(record, "reaction")?;
    match field_str(record, "op")? {
        "add" => store.add_reaction(node_id, collaborator_id, reaction, field_i64(record, "createdAt")?),
        "remove" => store.remove_reaction(node_id, collaborator_id, reaction),
        other => Err(EngineError::Validation(format!("unknown reaction op '{other}'"))),
    }
}

fn apply_interaction_record(store: &WorkspaceStore, record: &Value) -> Result<()> {
    store.record_interaction(
        field_str(record, "nodeId")?,
        field_str(record, "collaboratorId")?,
        record.get("opened").and_then(Value::as_bool).unwrap_or(false),
        field_i64(record, "at")?,
    )
}

fn apply_tombstone_record(store: &WorkspaceStore, record: &Value) -> Result<()> {
    store.create_tombstone(field_str(record, "id")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockTransport {
        push_failures: AtomicUsize,
        push_calls: AtomicUsize,
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn push_mutation(&self, _mutation: &Mutation) -> Result<()> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            if self.push_failures.load(Ordering::SeqCst) > 0 {
                self.push_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::TransientNetwork("timeout".into()));
            }
            Ok(())
        }

        async fn pull(&self, _stream: &str, cursor: Option<&str>) -> Result<PullBatch> {
            if cursor.is_some() {
                return Ok(PullBatch {
                    records: vec![],
                    next_cursor: cursor.map(str::to_string),
                });
            }
            Ok(PullBatch {
                records: vec![json!({"id": "n1"})],
                next_cursor: Some("1".into()),
            })
        }
    }

    #[tokio::test]
    async fn push_pending_drains_the_queue_in_order() {
        let store = WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap();
        store.with_connection(|conn| queue::enqueue(conn, "m1", "node.update", &Value::Null)).unwrap();
        store.with_connection(|conn| queue::enqueue(conn, "m2", "node.update", &Value::Null)).unwrap();

        let transport = MockTransport {
            push_failures: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
        };
        let sync = Synchronizer::new(transport, BackoffConfig::generic(), Arc::new(EventBus::new()));

        let pushed = sync.push_pending(&store, "ws1", 5).await.unwrap();
        assert_eq!(pushed, 2);
        assert!(store.with_connection(queue::peek_head).unwrap().is_none());
    }

    #[tokio::test]
    async fn a_transient_failure_stops_the_drain_without_losing_the_mutation() {
        let store = WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap();
        store.with_connection(|conn| queue::enqueue(conn, "m1", "node.update", &Value::Null)).unwrap();
        store.with_connection(|conn| queue::enqueue(conn, "m2", "node.update", &Value::Null)).unwrap();

        let transport = MockTransport {
            push_failures: AtomicUsize::new(1),
            push_calls: AtomicUsize::new(0),
        };
        let sync = Synchronizer::new(transport, BackoffConfig::generic(), Arc::new(EventBus::new()));

        let pushed = sync.push_pending(&store, "ws1", 5).await.unwrap();
        assert_eq!(pushed, 0);
        let remaining = store.with_connection(queue::list_all).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].retries, 1);
    }

    #[tokio::test]
    async fn pull_stream_advances_the_cursor_only_after_applying_the_batch() {
        let store = WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap();
        let transport = MockTransport {
            push_failures: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
        };
        let sync = Synchronizer::new(transport, BackoffConfig::generic(), Arc::new(EventBus::new()));

        let mut applied = Vec::new();
        let count = sync
            .pull_stream(&store, "nodes", |_store, record| {
                applied.push(record.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(applied.len(), 1);
        assert_eq!(store.get_cursor("nodes").unwrap().unwrap(), "1");
    }

    struct DispatchTransport;

    #[async_trait]
    impl SyncTransport for DispatchTransport {
        async fn push_mutation(&self, _mutation: &Mutation) -> Result<()> {
            Ok(())
        }

        async fn pull(&self, stream: &str, cursor: Option<&str>) -> Result<PullBatch> {
            if cursor.is_some() || stream != "nodes-updates" {
                return Ok(PullBatch {
                    records: vec![],
                    next_cursor: cursor.map(str::to_string),
                });
            }
            Ok(PullBatch {
                records: vec![json!({
                    "op": "full",
                    "id": "node1",
                    "rootId": "space1",
                    "attributes": {"type": "page", "parentId": "space1", "name": "Remote"},
                    "serverRevision": 3,
                    "createdAt": 0,
                    "createdBy": "u1",
                    "updatedAt": 0,
                    "updatedBy": "u1",
                })],
                next_cursor: Some("1".into()),
            })
        }
    }

    /// §4.4: "the synchronizer applies each entry via §4.2 inside a
    /// transaction" — a pulled `nodes-updates` record must land in the store,
    /// not get silently discarded by a no-op pull handler.
    #[tokio::test]
    async fn run_cycle_applies_pulled_node_records_to_the_store() {
        let store = WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap();
        let sync = Synchronizer::new(DispatchTransport, BackoffConfig::generic(), Arc::new(EventBus::new()));

        let report = sync.run_cycle(&store, "ws1", 5).await;
        assert!(report.all_succeeded());

        let node = store.fetch_node("node1").unwrap().unwrap();
        assert_eq!(node.attributes["name"], json!("Remote"));
        assert_eq!(node.server_revision, 3);
    }

    #[tokio::test]
    async fn collaborations_and_users_streams_are_explicit_no_ops() {
        let store = WorkspaceStore::in_memory("ws1", Arc::new(EventBus::new())).unwrap();
        apply_pulled_record(&store, "collaborations", &json!({"anything": "goes"})).unwrap();
        apply_pulled_record(&store, "users", &json!({"anything": "goes"})).unwrap();
    }
}
