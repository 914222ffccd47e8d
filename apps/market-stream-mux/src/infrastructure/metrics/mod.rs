//! Prometheus Metrics Module
//!
//! Exposes stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames received by kind and dropped by reason
//! - **Wire**: Subscribe/unsubscribe commands sent
//! - **Connections**: Venue connection state and reconnect attempts
//! - **Ledger**: Distinct tokens wanted per venue
//! - **Latency**: Frame dispatch time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! happens in `application::metrics`; this module installs the recorder
//! and describes each metric.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::metrics::{
    CONNECTED, DISPATCH_SECONDS, FRAMES_DROPPED, FRAMES_RECEIVED, LEDGER_TOKENS, RECONNECTS,
    WIRE_COMMANDS,
};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example when
/// another global recorder is already set).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        FRAMES_RECEIVED,
        "Total inbound frames decoded, by kind"
    );
    describe_counter!(
        FRAMES_DROPPED,
        "Total inbound frames dropped as malformed or unroutable, by reason"
    );

    // Wire counters
    describe_counter!(
        WIRE_COMMANDS,
        "Total subscribe/unsubscribe commands sent"
    );
    describe_counter!(
        RECONNECTS,
        "Total reconnect attempts scheduled"
    );

    // Gauges
    describe_gauge!(
        LEDGER_TOKENS,
        "Distinct tokens currently wanted"
    );
    describe_gauge!(
        CONNECTED,
        "1 if the venue stream is connected, else 0"
    );

    // Latency histograms
    describe_histogram!(
        DISPATCH_SECONDS,
        "Time to decode and apply one inbound frame"
    );
}

// =============================================================================
// Tests
// =============================================================================
