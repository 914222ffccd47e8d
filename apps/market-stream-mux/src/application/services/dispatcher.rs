//! Frame Dispatcher
//!
//! Routes inbound frames into the store. Nothing here fails: a frame that
//! cannot be decoded or validated is dropped, counted by reason, and logged
//! at debug so one bad frame never affects another token.
//!
//! Bare symbols are resolved against the tokens currently on the wire, so
//! a server that strips the exchange still lands data under the token a
//! consumer asked for.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::application::metrics;
use crate::application::ports::{FrameRejection, StreamCodec};
use crate::domain::streaming::StreamEvent;
use crate::domain::token::{InstrumentToken, SymbolResolver, Venue};
use crate::infrastructure::store::MarketStore;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Tick written to the store.
    Tick,
    /// Bar applied; `false` if ignored as stale.
    Bar {
        /// Whether the store changed.
        applied: bool,
    },
    /// Backfill merged.
    Backfill {
        /// Bars merged.
        merged: usize,
        /// Entries skipped as invalid.
        skipped: usize,
    },
    /// Status payload stored.
    Status,
    /// Control acknowledgement.
    Ack,
    /// Server reported an error.
    ServerError,
    /// Frame dropped.
    Dropped {
        /// Drop reason label.
        reason: &'static str,
    },
}

impl DispatchOutcome {
    /// Whether the frame was dropped.
    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

/// Applies inbound frames for one venue.
pub struct FrameDispatcher {
    resolver: SymbolResolver,
    store: Arc<MarketStore>,
    codec: Arc<dyn StreamCodec>,
}

impl FrameDispatcher {
    /// Create a dispatcher writing into `store`.
    #[must_use]
    pub fn new(venue: Venue, store: Arc<MarketStore>, codec: Arc<dyn StreamCodec>) -> Self {
        Self {
            resolver: SymbolResolver::new(venue),
            store,
            codec,
        }
    }

    fn venue(&self) -> &Venue {
        self.resolver.venue()
    }

    /// Tokens bare inbound symbols resolve against.
    pub fn set_wanted(&mut self, wanted: &BTreeSet<InstrumentToken>) {
        self.resolver.set_wanted(wanted);
    }

    /// Decode and apply one text frame.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        let started = Instant::now();
        let outcome = match self.codec.decode(text, &self.resolver, Utc::now()) {
            Ok(event) => {
                metrics::record_frame_received(self.venue().id(), event.kind());
                self.apply(event)
            }
            Err(rejection) => self.drop_frame(&rejection),
        };

        if let DispatchOutcome::Dropped { reason } = outcome {
            metrics::record_frame_dropped(self.venue().id(), reason);
        }
        metrics::record_dispatch_duration(self.venue().id(), started.elapsed());
        outcome
    }

    fn apply(&self, event: StreamEvent) -> DispatchOutcome {
        match event {
            StreamEvent::Tick(record) => {
                self.store.put_tick(record);
                DispatchOutcome::Tick
            }
            StreamEvent::Bar(record) => DispatchOutcome::Bar {
                applied: self.store.apply_bar(record),
            },
            StreamEvent::Backfill {
                token,
                interval,
                bars,
                skipped,
            } => {
                let merged = bars.len();
                self.store.merge_closed_bars(&token, &interval, bars);
                tracing::debug!(
                    venue = %self.venue(),
                    token = %token,
                    merged,
                    skipped,
                    "Merged backfill"
                );
                DispatchOutcome::Backfill { merged, skipped }
            }
            StreamEvent::Status { kind, payload } => {
                self.store.put_status(&kind, payload);
                DispatchOutcome::Status
            }
            StreamEvent::Ack(kind) => {
                tracing::trace!(venue = %self.venue(), kind = %kind, "Control ack");
                DispatchOutcome::Ack
            }
            StreamEvent::ServerError(message) => {
                tracing::warn!(
                    venue = %self.venue(),
                    message = message.as_deref().unwrap_or("unknown"),
                    "Stream reported error"
                );
                DispatchOutcome::ServerError
            }
        }
    }

    fn drop_frame(&self, rejection: &FrameRejection) -> DispatchOutcome {
        tracing::debug!(venue = %self.venue(), error = %rejection, "Dropping inbound frame");
        DispatchOutcome::Dropped {
            reason: rejection.reason,
        }
    }
}

impl std::fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDispatcher")
            .field("venue", &self.venue().id())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
