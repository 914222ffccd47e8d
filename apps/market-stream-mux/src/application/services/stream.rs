//! Market Stream and Subscriber Facade
//!
//! [`MarketStream`] bundles everything one venue shares: the ledger, the
//! wake signal, the status snapshot, and the process-wide store. Consumers
//! get a [`Subscriber`] each; the supervisor gets the same shared handles.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use market_stream_mux::application::services::MarketStream;
//! use market_stream_mux::domain::token::Venue;
//! use market_stream_mux::infrastructure::store::MarketStore;
//!
//! let store = Arc::new(MarketStore::default());
//! let stream = MarketStream::new(Venue::us(), store);
//!
//! let chart = stream.subscriber();
//! let watchlist = stream.subscriber();
//!
//! chart.subscribe(&["AAPL"]);
//! watchlist.subscribe(&["aapl", "MSFT"]);
//! assert_eq!(stream.ledger().stats().total_refs, 3);
//!
//! // Dropping a subscriber releases everything it holds
//! drop(watchlist);
//! assert_eq!(stream.ledger().stats().total_refs, 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::status::StreamStatus;
use super::supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorContext};
use crate::application::ports::{StreamCodec, StreamConnector};
use crate::domain::streaming::{ConnectionState, TickRecord};
use crate::domain::subscription::{ConsumerId, LedgerChanges, SubscriptionLedger};
use crate::domain::token::{InstrumentToken, Venue};
use crate::infrastructure::store::{KeyWatcher, MarketStore, StoreKey, TickListener};

// =============================================================================
// Market Stream
// =============================================================================

/// Shared state for one venue stream.
#[derive(Debug, Clone)]
pub struct MarketStream {
    venue: Venue,
    ledger: Arc<SubscriptionLedger>,
    wake: Arc<Notify>,
    store: Arc<MarketStore>,
    status: Arc<StreamStatus>,
    next_consumer: Arc<AtomicU64>,
}

impl MarketStream {
    /// Create a stream for `venue` writing into `store`.
    #[must_use]
    pub fn new(venue: Venue, store: Arc<MarketStore>) -> Self {
        Self {
            status: Arc::new(StreamStatus::new(venue.id())),
            venue,
            ledger: Arc::new(SubscriptionLedger::new()),
            wake: Arc::new(Notify::new()),
            store,
            next_consumer: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Venue served.
    #[must_use]
    pub const fn venue(&self) -> &Venue {
        &self.venue
    }

    /// The venue's ledger.
    #[must_use]
    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<MarketStore> {
        &self.store
    }

    /// The venue's status snapshot.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Create a new consumer handle.
    #[must_use]
    pub fn subscriber(&self) -> Subscriber {
        Subscriber {
            id: self.next_consumer.fetch_add(1, Ordering::Relaxed),
            venue: self.venue.clone(),
            ledger: Arc::clone(&self.ledger),
            wake: Arc::clone(&self.wake),
            store: Arc::clone(&self.store),
        }
    }

    /// Build the supervisor for this stream.
    #[must_use]
    pub fn supervisor<C: StreamConnector>(
        &self,
        connector: C,
        codec: Arc<dyn StreamCodec>,
        config: SupervisorConfig,
        cancel: CancellationToken,
    ) -> ConnectionSupervisor<C> {
        let ctx = SupervisorContext {
            venue: self.venue.clone(),
            ledger: Arc::clone(&self.ledger),
            wake: Arc::clone(&self.wake),
            store: Arc::clone(&self.store),
            status: Arc::clone(&self.status),
        };
        ConnectionSupervisor::new(ctx, connector, codec, config, cancel)
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// Per-consumer handle.
///
/// Registers interest in the venue's ledger and exposes the store as a read
/// view. Dropping the handle releases everything it still holds.
#[derive(Debug)]
pub struct Subscriber {
    id: ConsumerId,
    venue: Venue,
    ledger: Arc<SubscriptionLedger>,
    wake: Arc<Notify>,
    store: Arc<MarketStore>,
}

impl Subscriber {
    /// Consumer identifier.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Add interest in `symbols`.
    ///
    /// Symbols are trimmed, uppercased, qualified with the venue's default
    /// exchange when bare, and deduped. Invalid or foreign symbols are
    /// skipped; an empty result is a no-op. Returns the normalized tokens.
    pub fn subscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<InstrumentToken> {
        let tokens = self.venue.normalize_all(symbols);
        if tokens.is_empty() {
            return tokens;
        }
        let changes = self.ledger.increment(self.id, &tokens);
        self.signal(&changes);
        tokens
    }

    /// Drop interest in `symbols` held by this subscriber.
    ///
    /// Returns the normalized tokens.
    pub fn unsubscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<InstrumentToken> {
        let tokens = self.venue.normalize_all(symbols);
        if tokens.is_empty() {
            return tokens;
        }
        let changes = self.ledger.decrement(self.id, &tokens);
        self.signal(&changes);
        tokens
    }

    /// Drop all interest held by this subscriber.
    pub fn release(&self) {
        let changes = self.ledger.release_consumer(self.id);
        self.signal(&changes);
    }

    fn signal(&self, changes: &LedgerChanges) {
        if changes.is_empty() {
            return;
        }
        tracing::debug!(
            venue = %self.venue,
            consumer = self.id,
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Ledger key set changed"
        );
        self.wake.notify_one();
    }

    /// Tokens this subscriber holds, with counts.
    #[must_use]
    pub fn holdings(&self) -> HashMap<InstrumentToken, usize> {
        self.ledger.consumer_tokens(self.id)
    }

    /// Read view of the store.
    #[must_use]
    pub fn store(&self) -> &MarketStore {
        &self.store
    }

    /// Latest tick for a token.
    #[must_use]
    pub fn tick(&self, token: &InstrumentToken) -> Option<TickRecord> {
        self.store.tick(token)
    }

    /// The venue's connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.store.connection(self.venue.id())
    }

    /// Watch tick changes for the given tokens plus the venue's connection.
    #[must_use]
    pub fn watch_ticks(&self, tokens: &[InstrumentToken]) -> KeyWatcher {
        let keys = tokens
            .iter()
            .cloned()
            .map(StoreKey::Tick)
            .chain(std::iter::once(StoreKey::Connection(self.venue.id().to_string())));
        self.store.watch_keys(keys)
    }

    /// Every tick as a discrete event.
    #[must_use]
    pub fn tick_listener(&self) -> TickListener {
        self.store.tick_listener()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.release();
    }
}
