//! Stream Metric Recording
//!
//! Recording helpers over the `metrics` facade. Without an installed
//! recorder every call is a no-op, so services and tests record freely;
//! `infrastructure::metrics` installs the Prometheus recorder.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Inbound frames decoded, by kind.
pub const FRAMES_RECEIVED: &str = "market_stream_frames_received_total";
/// Inbound frames dropped, by reason.
pub const FRAMES_DROPPED: &str = "market_stream_frames_dropped_total";
/// Subscribe/unsubscribe commands sent.
pub const WIRE_COMMANDS: &str = "market_stream_wire_commands_total";
/// Reconnect attempts scheduled.
pub const RECONNECTS: &str = "market_stream_reconnects_total";
/// Distinct tokens wanted.
pub const LEDGER_TOKENS: &str = "market_stream_ledger_tokens";
/// Connected flag.
pub const CONNECTED: &str = "market_stream_connected";
/// Frame dispatch time.
pub const DISPATCH_SECONDS: &str = "market_stream_dispatch_seconds";

/// Record a decoded inbound frame.
pub fn record_frame_received(venue: &str, kind: &'static str) {
    counter!(FRAMES_RECEIVED, "venue" => venue.to_string(), "kind" => kind).increment(1);
}

/// Record a dropped inbound frame.
pub fn record_frame_dropped(venue: &str, reason: &'static str) {
    counter!(FRAMES_DROPPED, "venue" => venue.to_string(), "reason" => reason).increment(1);
}

/// Record a wire command sent.
pub fn record_wire_command(venue: &str, op: &'static str) {
    counter!(WIRE_COMMANDS, "venue" => venue.to_string(), "op" => op).increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect(venue: &str) {
    counter!(RECONNECTS, "venue" => venue.to_string()).increment(1);
}

/// Update the ledger size for a venue.
#[allow(clippy::cast_precision_loss)]
pub fn set_ledger_tokens(venue: &str, count: usize) {
    gauge!(LEDGER_TOKENS, "venue" => venue.to_string()).set(count as f64);
}

/// Update the connected flag for a venue.
pub fn set_connected(venue: &str, connected: bool) {
    gauge!(CONNECTED, "venue" => venue.to_string()).set(if connected { 1.0 } else { 0.0 });
}

/// Record frame dispatch duration.
pub fn record_dispatch_duration(venue: &str, duration: Duration) {
    histogram!(DISPATCH_SECONDS, "venue" => venue.to_string()).record(duration.as_secs_f64());
}
