//! Stream Status
//!
//! Per-venue health snapshot updated by the supervisor and read by the
//! health server.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::connection::ConnectionPhase;
use crate::domain::streaming::ConnectionState;

/// Live status of one venue stream.
#[derive(Debug)]
pub struct StreamStatus {
    venue: String,
    phase: RwLock<ConnectionPhase>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    wire_tokens: AtomicUsize,
    ledger_tokens: AtomicUsize,
}

impl StreamStatus {
    /// Create an idle status for `venue`.
    #[must_use]
    pub fn new(venue: &str) -> Self {
        Self {
            venue: venue.to_string(),
            phase: RwLock::new(ConnectionPhase::Idle),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            wire_tokens: AtomicUsize::new(0),
            ledger_tokens: AtomicUsize::new(0),
        }
    }

    /// Venue identifier.
    #[must_use]
    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Record a phase change.
    pub fn set_phase(&self, phase: ConnectionPhase, attempts: u32) {
        *self.phase.write() = phase;
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
        if phase == ConnectionPhase::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Record the most recent transport error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Count one inbound frame.
    pub fn record_frame(&self, dropped: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Update wire and ledger sizes.
    pub fn set_sizes(&self, wire: usize, ledger: usize) {
        self.wire_tokens.store(wire, Ordering::Relaxed);
        self.ledger_tokens.store(ledger, Ordering::Relaxed);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.read()
    }

    /// Published connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.phase().state()
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> StreamStatusSnapshot {
        let phase = self.phase();
        StreamStatusSnapshot {
            venue: self.venue.clone(),
            phase: phase.label(),
            state: phase.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            wire_tokens: self.wire_tokens.load(Ordering::Relaxed),
            ledger_tokens: self.ledger_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`StreamStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatusSnapshot {
    /// Venue identifier.
    pub venue: String,
    /// Supervisor phase label.
    pub phase: &'static str,
    /// Published connection state.
    pub state: ConnectionState,
    /// Last successful open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last transport error since the last open.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// Inbound frames seen.
    pub frames_received: u64,
    /// Inbound frames dropped.
    pub frames_dropped: u64,
    /// Tokens on the wire.
    pub wire_tokens: usize,
    /// Tokens in the ledger.
    pub ledger_tokens: usize,
}
