//! Socket session (§4.5): one WebSocket per account, with reconnection,
//! exponential backoff, and explicit teardown.
//!
//! This module owns the lifecycle state machine and backoff bookkeeping;
//! the actual `tokio-tungstenite` connect/read/write loop is driven by a
//! host task that calls into `SocketSession` at each transition point,
//! mirroring the `SyncTransport`/reconnect-loop split in the teacher's
//! desktop integration.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config::BackoffConfig;

/// Lifecycle state of one socket session (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Number of consecutive health-check ticks a session may remain in
/// `Closing` before it is forced to `Closed` (stuck-socket safeguard, §4.5).
const MAX_CLOSING_TICKS: u32 = 3;

/// Tracks one account's socket lifecycle and its reconnection backoff.
pub struct SocketSession {
    state: watch::Sender<SocketState>,
    backoff: BackoffConfig,
    attempt: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    closing_ticks: u32,
}

impl SocketSession {
    /// Create a new session in `Idle`, with the given reconnection backoff
    /// tunables (§4.5: base 5s / max 1min for socket-specific reconnection).
    pub fn new(backoff: BackoffConfig) -> Self {
        let (state, _) = watch::channel(SocketState::Idle);
        Self {
            state,
            backoff,
            attempt: 0,
            last_attempt_at: None,
            closing_ticks: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SocketState> {
        self.state.subscribe()
    }

    /// `Idle -> Connecting`, gated by backoff: returns `false` (and does not
    /// transition) if called again before the computed delay has elapsed.
    pub fn begin_connecting(&mut self, now: DateTime<Utc>) -> bool {
        if self.state() != SocketState::Idle && self.state() != SocketState::Closed {
            return false;
        }
        if let Some(last) = self.last_attempt_at {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < self.backoff.delay(self.attempt) {
                return false;
            }
        }
        self.attempt += 1;
        self.last_attempt_at = Some(now);
        self.closing_ticks = 0;
        let _ = self.state.send(SocketState::Connecting);
        true
    }

    /// `Connecting -> Open`, resetting the backoff counter on success.
    pub fn mark_open(&mut self) {
        self.attempt = 0;
        self.last_attempt_at = None;
        let _ = self.state.send(SocketState::Open);
    }

    /// `Open -> Closing`, triggered by an explicit `close()` or an underlying error.
    pub fn begin_closing(&mut self) {
        if self.state() == SocketState::Open || self.state() == SocketState::Connecting {
            self.closing_ticks = 0;
            let _ = self.state.send(SocketState::Closing);
        }
    }

    /// `Closing -> Closed`, triggered by the underlying close event.
    pub fn mark_closed(&mut self) {
        let _ = self.state.send(SocketState::Closed);
    }

    /// Called once per health-check tick while `Closing`; forces `Closed`
    /// if the session has been stuck there too long (§4.5 safeguard).
    pub fn tick_closing_safeguard(&mut self) -> bool {
        if self.state() != SocketState::Closing {
            self.closing_ticks = 0;
            return false;
        }
        self.closing_ticks += 1;
        if self.closing_ticks >= MAX_CLOSING_TICKS {
            self.mark_closed();
            true
        } else {
            false
        }
    }

    /// Explicit teardown. Drops to `Closing`; the caller's close handler
    /// should not itself trigger reconnection once this is in flight.
    pub fn close(&mut self) {
        self.begin_closing();
    }

    /// The delay the next `begin_connecting` call would be gated by, purely
    /// for callers that want to schedule a retry without polling.
    pub fn next_delay(&self) -> std::time::Duration {
        self.backoff.delay(self.attempt)
    }
}
