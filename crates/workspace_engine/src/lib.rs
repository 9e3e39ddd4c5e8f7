#![warn(missing_docs)]
//! Local-first workspace data engine: CRDT documents, an embedded SQL
//! replica, and server synchronization, as a library consumed by a host
//! shell (desktop, mobile, or test harness) that owns the event loop.

/// Configuration options.
pub mod config;

/// Error (common error types).
pub mod error;

/// Filesystem abstraction for file/avatar blobs.
pub mod fs;

/// CRDT document layer: schema-validated, causally-consistent documents.
pub mod crdt;

/// Mutation queue: durable, ordered record of local intents to sync.
pub mod queue;

/// Workspace store: the durable, queryable replica of one workspace's node graph.
pub mod store;

/// Synchronizer: drains the mutation queue and pulls authoritative updates.
pub mod sync;

/// Socket session: per-account WebSocket lifecycle and reconnection.
pub mod socket;

/// WebSocket wire transport: the concrete `SyncTransport` over `tokio-tungstenite`.
pub mod transport;

/// File transfer state machine.
pub mod transfer;

/// In-process event bus.
pub mod events;

/// Query handler registry with reference-counted subscriptions.
pub mod mediator;

/// Role hierarchies and per-node-type capability checks.
pub mod permission;

/// Path resolution for the persisted state layout.
pub mod paths;

/// Account/Workspace service lifecycle tree.
pub mod services;

pub use error::{EngineError, ErrorKind, Result};
