//! Streaming Records
//!
//! Value types published by the stream: ticks, bars, and connection state.
//!
//! # Design
//!
//! Records are validated before construction (finite prices, parsed
//! timestamps), so everything stored downstream is trusted. [`BarSeries`]
//! owns the partial/closed rule for one token and interval:
//!
//! - A partial bar is overwritten in place until a closed bar with the same
//!   timestamp arrives
//! - A closed bar is inserted into an ascending sequence, replacing any
//!   existing bar with the same timestamp, and clears a matching partial
//! - Once the sequence exceeds its retention cap the oldest bars are dropped

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::token::InstrumentToken;

// =============================================================================
// Connection State
// =============================================================================

/// Published connection state of a venue stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport, or the transport was lost.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open and reconciled.
    Connected,
}

impl ConnectionState {
    /// Lowercase label used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tick
// =============================================================================

/// Latest trade snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    /// Instrument token.
    pub token: InstrumentToken,
    /// Last traded price.
    pub ltp: f64,
    /// Absolute change from previous close.
    pub change: f64,
    /// Percent change from previous close.
    pub change_pct: f64,
    /// Open interest, for derivatives.
    pub oi: Option<f64>,
    /// Traded volume.
    pub volume: Option<f64>,
    /// Exchange or receipt timestamp.
    pub ts: DateTime<Utc>,
}

// =============================================================================
// Bar
// =============================================================================

/// Whether a bar is still forming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarStatus {
    /// Still forming; overwritten by later updates.
    Partial,
    /// Final for its interval.
    Closed,
}

/// One OHLCV aggregation interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarRecord {
    /// Instrument token.
    pub token: InstrumentToken,
    /// Interval label, e.g. `1m`.
    pub interval: String,
    /// Bar open time, epoch milliseconds.
    pub t: i64,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Volume.
    pub volume: f64,
    /// Volume-weighted average price.
    pub vwap: Option<f64>,
    /// Trading session label (`pre`, `regular`, `post`).
    pub session: Option<String>,
    /// Whether the bar falls in extended hours.
    pub extended: Option<bool>,
    /// Partial or closed.
    pub status: BarStatus,
}

impl BarRecord {
    /// Same bar, re-labelled with a different status.
    #[must_use]
    pub fn with_status(mut self, status: BarStatus) -> Self {
        self.status = status;
        self
    }
}

// =============================================================================
// Stream Events
// =============================================================================

/// One validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Last-price update, from a tick or a trade print.
    Tick(TickRecord),
    /// Bar update under the partial/closed rule.
    Bar(BarRecord),
    /// Closed-bar history for one token.
    Backfill {
        /// Token.
        token: InstrumentToken,
        /// Interval label.
        interval: String,
        /// Valid closed bars.
        bars: Vec<BarRecord>,
        /// Entries skipped as invalid.
        skipped: usize,
    },
    /// Side-channel status payload, kept verbatim.
    Status {
        /// The payload kind.
        kind: String,
        /// The whole frame.
        payload: serde_json::Value,
    },
    /// Control acknowledgement.
    Ack(String),
    /// Server-reported error.
    ServerError(Option<String>),
}

impl StreamEvent {
    /// Label for the received-frames counter.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick(_) => "tick",
            Self::Bar(_) => "bar",
            Self::Backfill { .. } => "backfill",
            Self::Status { .. } => "status",
            Self::Ack(_) => "ack",
            Self::ServerError(_) => "error",
        }
    }
}

// =============================================================================
// Bar Series
// =============================================================================

/// Bars for one token and interval: the forming bar plus the closed history.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    partial: Option<BarRecord>,
    closed: Vec<BarRecord>,
}

impl BarSeries {
    /// Create an empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partial: None,
            closed: Vec::new(),
        }
    }

    /// Apply a bar update according to its status.
    ///
    /// Returns `false` when the update was ignored (a partial for a
    /// timestamp that is already closed).
    pub fn apply(&mut self, bar: BarRecord, max_closed: usize) -> bool {
        match bar.status {
            BarStatus::Partial => self.apply_partial(bar),
            BarStatus::Closed => {
                self.insert_closed(bar, max_closed);
                true
            }
        }
    }

    fn apply_partial(&mut self, bar: BarRecord) -> bool {
        let already_closed = self
            .closed
            .binary_search_by_key(&bar.t, |b| b.t)
            .is_ok();
        if already_closed {
            return false;
        }
        self.partial = Some(bar);
        true
    }

    fn insert_closed(&mut self, bar: BarRecord, max_closed: usize) {
        if self.partial.as_ref().is_some_and(|p| p.t == bar.t) {
            self.partial = None;
        }

        match self.closed.binary_search_by_key(&bar.t, |b| b.t) {
            Ok(idx) => self.closed[idx] = bar,
            Err(idx) => self.closed.insert(idx, bar),
        }

        if self.closed.len() > max_closed {
            let excess = self.closed.len() - max_closed;
            self.closed.drain(..excess);
        }
    }

    /// Merge a batch of closed bars (backfill).
    pub fn merge_closed<I>(&mut self, bars: I, max_closed: usize)
    where
        I: IntoIterator<Item = BarRecord>,
    {
        for bar in bars {
            self.insert_closed(bar.with_status(BarStatus::Closed), max_closed);
        }
    }

    /// The forming bar, if any.
    #[must_use]
    pub const fn partial(&self) -> Option<&BarRecord> {
        self.partial.as_ref()
    }

    /// Closed bars, ascending by time.
    #[must_use]
    pub fn closed(&self) -> &[BarRecord] {
        &self.closed
    }
}

// =============================================================================
// Tests
// =============================================================================
