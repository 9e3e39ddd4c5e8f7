//! CRDT document layer (§4.1): schema-validated, causally-consistent,
//! operation-based documents over a compact binary wire format, built on
//! `yrs`. Used by the workspace store to back node `attributes` and
//! document `content`.

mod document;
mod memory_storage;
mod schema;
mod sqlite_storage;
mod storage;
mod text_diff;
mod types;

pub use document::CrdtDocument;
pub use memory_storage::MemoryStorage;
pub use schema::Schema;
pub use sqlite_storage::SqliteStorage;
pub use storage::{CrdtStorage, StorageResult};
pub use text_diff::apply_text_diff;
pub use types::{CrdtUpdate, UpdateOrigin};
