//! Core types shared by the CRDT layer: update records and their origin.

use serde::{Deserialize, Serialize};

/// A CRDT update record, stored for history and sync purposes.
#[derive(Debug, Clone)]
pub struct CrdtUpdate {
    /// Unique identifier for this update (monotonic per document).
    pub update_id: i64,

    /// Name of the document this update belongs to (a node or document id).
    pub doc_name: String,

    /// Binary yrs update data.
    pub data: Vec<u8>,

    /// Unix timestamp when this update was created (milliseconds).
    pub timestamp: i64,

    /// Origin of this update (local edit, remote sync, etc).
    pub origin: UpdateOrigin,

    /// Device ID that created this update (for multi-device attribution).
    pub device_id: Option<String>,

    /// Human-readable device name (e.g. "MacBook Pro", "iPhone").
    pub device_name: Option<String>,
}

/// Origin of a CRDT update, used to distinguish local vs remote changes.
///
/// The undo manager only tracks transactions stamped `Local`; `applyUpdate`
/// calls for remote or sync-handshake data must never be stamped `Local`
/// (see spec §9, "Undo/redo").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Update originated from local user action.
    Local,
    /// Update received from a remote peer via the synchronizer.
    Remote,
    /// Update applied during the initial sync handshake.
    Sync,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            _ => Err(format!("unknown update origin: {s}")),
        }
    }
}
