//! Latest-Value Coalescer
//!
//! Merges a burst of high-frequency events into one delivery per flush.
//!
//! # Design
//!
//! Two pieces of state, the same vocabulary as the wire reconciler:
//! - a pending flag, set by the first offer after a flush
//! - the latest payload, overwritten by every offer
//!
//! Only the offer that flips the pending flag schedules a flush, so a flush
//! is never duplicated, and the flush always sees the newest payload.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

// =============================================================================
// Coalescer
// =============================================================================

/// Pending flag plus latest-payload slot.
///
/// # Example
///
/// ```rust
/// use market_stream_mux::domain::coalesce::LatestCoalescer;
///
/// let coalescer = LatestCoalescer::new();
///
/// assert!(coalescer.offer(1));   // schedules a flush
/// assert!(!coalescer.offer(2));  // already pending
/// assert!(!coalescer.offer(3));
///
/// assert_eq!(coalescer.take(), Some(3));
/// assert_eq!(coalescer.take(), None);
/// ```
#[derive(Debug)]
pub struct LatestCoalescer<T> {
    latest: Mutex<Option<T>>,
    pending: AtomicBool,
    wake: Notify,
}

impl<T> Default for LatestCoalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestCoalescer<T> {
    /// Create an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            pending: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Store `value` as the latest payload.
    ///
    /// Returns `true` if this offer scheduled a flush.
    pub fn offer(&self, value: T) -> bool {
        let mut latest = self.latest.lock();
        *latest = Some(value);
        let scheduled = !self.pending.swap(true, Ordering::AcqRel);
        drop(latest);

        if scheduled {
            self.wake.notify_one();
        }
        scheduled
    }

    /// Clear the pending flag and return the latest payload.
    pub fn take(&self) -> Option<T> {
        let mut latest = self.latest.lock();
        self.pending.store(false, Ordering::Release);
        latest.take()
    }

    /// Whether a flush is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until a flush is scheduled.
    pub async fn scheduled(&self) {
        if self.is_pending() {
            return;
        }
        self.wake.notified().await;
    }
}

// =============================================================================
// Crosshair Event
// =============================================================================

/// Pointer position shared across chart panes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrosshairEvent {
    /// Pane that produced the event.
    pub pane: u32,
    /// Hovered bar time, epoch milliseconds.
    pub time_ms: i64,
    /// Hovered price, if the pointer is over the price axis.
    pub price: Option<f64>,
}
