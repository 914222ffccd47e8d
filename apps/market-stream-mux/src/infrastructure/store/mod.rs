//! Tick/Bar Store
//!
//! Process-wide last-value cache for stream data, with key-scoped change
//! notification and raw tick listeners.
//!
//! # Architecture
//!
//! The store is explicitly constructed once at startup and shared via
//! `Arc`. Writes come only from the frame dispatchers; reads are snapshot
//! clones, so readers never hold a lock across an await.
//!
//! Two broadcast channels fan out updates:
//! - `changes`: a [`StoreKey`] per write, filtered per reader by [`KeyWatcher`]
//! - `ticks`: every tick as a discrete event, for [`TickListener`]
//!
//! A tick listener that lags behind skips what it missed. A key watcher
//! that lags reports [`StoreChange::Resync`] instead, since a skipped
//! message may have been a change to one of its keys.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::streaming::{BarRecord, BarSeries, ConnectionState, TickRecord};
use crate::domain::token::InstrumentToken;

// =============================================================================
// Configuration
// =============================================================================

/// Store sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Retention cap for each closed-bar sequence.
    pub max_closed_bars: usize,
    /// Capacity of the raw tick channel.
    pub tick_channel_capacity: usize,
    /// Capacity of the change notification channel.
    pub change_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_closed_bars: 390,
            tick_channel_capacity: 4096,
            change_channel_capacity: 4096,
        }
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Identifies one readable slot in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Latest tick for a token.
    Tick(InstrumentToken),
    /// Bars for a token and interval.
    Bars {
        /// Token.
        token: InstrumentToken,
        /// Interval label.
        interval: String,
    },
    /// Side-channel status payload by kind.
    Status(String),
    /// Connection state of a venue.
    Connection(String),
}

/// What a [`KeyWatcher`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A watched key changed.
    Key(StoreKey),
    /// Notifications were lost; any watched key may have changed.
    Resync,
}

impl StoreChange {
    /// Whether `key` may have changed.
    #[must_use]
    pub fn affects(&self, key: &StoreKey) -> bool {
        match self {
            Self::Key(changed) => changed == key,
            Self::Resync => true,
        }
    }
}

impl StoreKey {
    /// Bars key.
    #[must_use]
    pub fn bars(token: &InstrumentToken, interval: &str) -> Self {
        Self::Bars {
            token: token.clone(),
            interval: interval.to_string(),
        }
    }
}

// =============================================================================
// Market Store
// =============================================================================

/// Shared last-value cache.
///
/// # Example
///
/// ```rust
/// use market_stream_mux::infrastructure::store::{MarketStore, StoreConfig};
/// use market_stream_mux::domain::streaming::ConnectionState;
///
/// let store = MarketStore::new(StoreConfig::default());
/// assert_eq!(store.connection("us"), ConnectionState::Disconnected);
///
/// store.set_connection("us", ConnectionState::Connected);
/// assert_eq!(store.connection("us"), ConnectionState::Connected);
/// ```
#[derive(Debug)]
pub struct MarketStore {
    config: StoreConfig,
    ticks: RwLock<HashMap<InstrumentToken, TickRecord>>,
    bars: RwLock<HashMap<(InstrumentToken, String), BarSeries>>,
    status: RwLock<HashMap<String, serde_json::Value>>,
    connections: RwLock<HashMap<String, ConnectionState>>,
    changes_tx: broadcast::Sender<StoreKey>,
    ticks_tx: broadcast::Sender<TickRecord>,
}

impl Default for MarketStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MarketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ticks: RwLock::new(HashMap::new()),
            bars: RwLock::new(HashMap::new()),
            status: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            changes_tx: broadcast::channel(config.change_channel_capacity.max(1)).0,
            ticks_tx: broadcast::channel(config.tick_channel_capacity.max(1)).0,
        }
    }

    /// Store sizing.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn notify(&self, key: StoreKey) {
        // No receivers is fine
        let _ = self.changes_tx.send(key);
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replace the latest tick for its token and emit it to tick listeners.
    pub fn put_tick(&self, tick: TickRecord) {
        let key = StoreKey::Tick(tick.token.clone());
        self.ticks.write().insert(tick.token.clone(), tick.clone());
        self.notify(key);
        let _ = self.ticks_tx.send(tick);
    }

    /// Apply a bar update under the partial/closed rule.
    ///
    /// Returns `false` if the update was ignored.
    pub fn apply_bar(&self, bar: BarRecord) -> bool {
        let key = StoreKey::bars(&bar.token, &bar.interval);
        let applied = self
            .bars
            .write()
            .entry((bar.token.clone(), bar.interval.clone()))
            .or_default()
            .apply(bar, self.config.max_closed_bars);
        if applied {
            self.notify(key);
        }
        applied
    }

    /// Merge closed bars into one token's sequence.
    pub fn merge_closed_bars(&self, token: &InstrumentToken, interval: &str, bars: Vec<BarRecord>) {
        if bars.is_empty() {
            return;
        }
        self.bars
            .write()
            .entry((token.clone(), interval.to_string()))
            .or_default()
            .merge_closed(bars, self.config.max_closed_bars);
        self.notify(StoreKey::bars(token, interval));
    }

    /// Store a status payload verbatim.
    pub fn put_status(&self, kind: &str, payload: serde_json::Value) {
        self.status.write().insert(kind.to_string(), payload);
        self.notify(StoreKey::Status(kind.to_string()));
    }

    /// Record a venue's connection state. Notifies only on change.
    pub fn set_connection(&self, venue: &str, state: ConnectionState) {
        let previous = self.connections.write().insert(venue.to_string(), state);
        if previous != Some(state) {
            self.notify(StoreKey::Connection(venue.to_string()));
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Latest tick for a token.
    #[must_use]
    pub fn tick(&self, token: &InstrumentToken) -> Option<TickRecord> {
        self.ticks.read().get(token).cloned()
    }

    /// Forming bar for a token and interval.
    #[must_use]
    pub fn partial_bar(&self, token: &InstrumentToken, interval: &str) -> Option<BarRecord> {
        self.bars
            .read()
            .get(&(token.clone(), interval.to_string()))
            .and_then(|series| series.partial().cloned())
    }

    /// Closed bars for a token and interval, ascending by time.
    #[must_use]
    pub fn closed_bars(&self, token: &InstrumentToken, interval: &str) -> Vec<BarRecord> {
        self.bars
            .read()
            .get(&(token.clone(), interval.to_string()))
            .map(|series| series.closed().to_vec())
            .unwrap_or_default()
    }

    /// Status payload by kind.
    #[must_use]
    pub fn status(&self, kind: &str) -> Option<serde_json::Value> {
        self.status.read().get(kind).cloned()
    }

    /// Connection state of a venue; `Disconnected` if never set.
    #[must_use]
    pub fn connection(&self, venue: &str) -> ConnectionState {
        self.connections
            .read()
            .get(venue)
            .copied()
            .unwrap_or_default()
    }

    /// Connection states of every venue seen so far.
    #[must_use]
    pub fn connections(&self) -> HashMap<String, ConnectionState> {
        self.connections.read().clone()
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Watch a set of keys for changes.
    #[must_use]
    pub fn watch_keys<I>(&self, keys: I) -> KeyWatcher
    where
        I: IntoIterator<Item = StoreKey>,
    {
        KeyWatcher {
            keys: keys.into_iter().collect(),
            rx: self.changes_tx.subscribe(),
        }
    }

    /// Listen to every tick as a discrete event.
    #[must_use]
    pub fn tick_listener(&self) -> TickListener {
        TickListener {
            rx: self.ticks_tx.subscribe(),
        }
    }

    /// Wait until a venue reaches `state`.
    pub async fn wait_for_connection(&self, venue: &str, state: ConnectionState) {
        let mut watcher = self.watch_keys([StoreKey::Connection(venue.to_string())]);
        loop {
            if self.connection(venue) == state {
                return;
            }
            if watcher.changed().await.is_none() {
                return;
            }
        }
    }

    /// Number of active tick listeners.
    #[must_use]
    pub fn tick_listener_count(&self) -> usize {
        self.ticks_tx.receiver_count()
    }
}

// =============================================================================
// Receivers
// =============================================================================

/// Change stream filtered to a fixed key set.
#[derive(Debug)]
pub struct KeyWatcher {
    keys: HashSet<StoreKey>,
    rx: broadcast::Receiver<StoreKey>,
}

impl KeyWatcher {
    /// Wait for the next change to a watched key.
    ///
    /// After falling behind the change channel this returns
    /// [`StoreChange::Resync`], and the caller should re-read every watched
    /// key. Returns `None` once the store is dropped.
    pub async fn changed(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(key) if self.keys.contains(&key) => return Some(StoreChange::Key(key)),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Key watcher lagged behind store changes, resyncing");
                    return Some(StoreChange::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Keys being watched.
    #[must_use]
    pub const fn keys(&self) -> &HashSet<StoreKey> {
        &self.keys
    }
}

/// Every tick written to the store, in write order.
#[derive(Debug)]
pub struct TickListener {
    rx: broadcast::Receiver<TickRecord>,
}

impl TickListener {
    /// Wait for the next tick.
    ///
    /// Returns `None` once the store is dropped.
    pub async fn recv(&mut self) -> Option<TickRecord> {
        loop {
            match self.rx.recv().await {
                Ok(tick) => return Some(tick),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Tick listener lagged, skipping ticks");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
