//! File transfer state machine (§4.6).
//!
//! A pure state machine over the `FileState` fields of §3: no byte transfer
//! happens here (out of scope), only the download/upload status tracked
//! alongside it. Download and upload are independent sub-machines; only one
//! may be `InProgress` at a time per file id.

use chrono::{DateTime, Utc};

use crate::config::BackoffConfig;

/// Status of one direction (download or upload) of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    None,
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One direction's transfer state: status, progress, retries, timestamps.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub status: TransferStatus,
    /// 0-100. `completed_at.is_some()` implies `progress == 100`.
    pub progress: u8,
    pub retries: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for TransferState {
    fn default() -> Self {
        Self {
            status: TransferStatus::None,
            progress: 0,
            retries: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

impl TransferState {
    /// Move from `None`/`Failed` into `Pending`, awaiting the next attempt.
    pub fn enqueue(&mut self, now: DateTime<Utc>) {
        self.status = TransferStatus::Pending;
        self.progress = 0;
        self.completed_at = None;
        let _ = now;
    }

    /// `Pending -> InProgress`.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = TransferStatus::InProgress;
        self.started_at = Some(now);
    }

    /// Update progress while `InProgress`. Clamped to `[0, 100]`.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    /// `InProgress -> Completed`. Forces progress to 100 (invariant: `completed_at` implies 100%).
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = TransferStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
    }

    /// `InProgress -> Failed`, bumping the retry count.
    pub fn fail(&mut self) {
        self.status = TransferStatus::Failed;
        self.retries += 1;
    }

    /// Whether a failed transfer may be retried yet, given exponential backoff
    /// anchored at `started_at` (the time of the attempt that failed).
    pub fn can_retry(&self, now: DateTime<Utc>, backoff: &BackoffConfig) -> bool {
        if self.status != TransferStatus::Failed {
            return false;
        }
        match self.started_at {
            Some(last_attempt) => {
                let elapsed = (now - last_attempt).to_std().unwrap_or_default();
                elapsed >= backoff.delay(self.retries)
            }
            None => true,
        }
    }

    /// `Failed -> Pending`, gated by `can_retry`.
    pub fn retry(&mut self, now: DateTime<Utc>, backoff: &BackoffConfig) -> bool {
        if !self.can_retry(now, backoff) {
            return false;
        }
        self.enqueue(now);
        true
    }
}

/// The two independent sub-machines for one file node (§4.6).
#[derive(Debug, Clone, Default)]
pub struct FileTransferState {
    pub download: TransferState,
    pub upload: TransferState,
}

impl FileTransferState {
    /// Whether either sub-machine is currently transferring. Used to
    /// enforce "only one sub-machine `InProgress` at a time per file id"
    /// is meant per-direction, not across directions — this exposes both
    /// for callers that need to serialize around a single I/O slot.
    pub fn any_in_progress(&self) -> bool {
        self.download.status == TransferStatus::InProgress
            || self.upload.status == TransferStatus::InProgress
    }
}
