//! Subscription Ledger
//!
//! Reference-counted record of everything currently wanted on a venue.
//!
//! # Design
//!
//! The ledger tracks:
//! - How many live subscriptions want each token (the union of all interest)
//! - Which tokens each consumer holds, and how many times
//!
//! A token present in the ledger always has a count of at least 1; reaching
//! 0 removes the entry. Consumers can only release interest they hold, so an
//! early unsubscribe by one widget never kills the stream for another.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::token::InstrumentToken;

// =============================================================================
// Types
// =============================================================================

/// Wire command operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireOp {
    /// Start streaming the listed tokens.
    Subscribe,
    /// Stop streaming the listed tokens.
    Unsubscribe,
}

impl WireOp {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Unique identifier for a consumer (one subscriber facade).
pub type ConsumerId = u64;

/// Tokens whose presence in the ledger changed during one mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    /// Tokens whose count went 0 → 1.
    pub added: Vec<InstrumentToken>,
    /// Tokens whose count went 1 → 0.
    pub removed: Vec<InstrumentToken>,
}

impl LedgerChanges {
    /// Check if the key set changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Ledger statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Number of distinct tokens wanted.
    pub token_count: usize,
    /// Number of consumers holding at least one token.
    pub consumer_count: usize,
    /// Sum of all reference counts.
    pub total_refs: usize,
}

// =============================================================================
// Ledger State
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    /// Map from consumer ID to held tokens and how many times each is held.
    consumer_tokens: HashMap<ConsumerId, HashMap<InstrumentToken, usize>>,
    /// Map from token to reference count.
    token_refcount: HashMap<InstrumentToken, usize>,
}

impl LedgerState {
    fn increment(&mut self, consumer: ConsumerId, tokens: &[InstrumentToken]) -> Vec<InstrumentToken> {
        let held = self.consumer_tokens.entry(consumer).or_default();
        let mut added = Vec::new();

        for token in tokens {
            *held.entry(token.clone()).or_insert(0) += 1;

            let refcount = self.token_refcount.entry(token.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                added.push(token.clone());
            }
        }

        if held.is_empty() {
            self.consumer_tokens.remove(&consumer);
        }

        added
    }

    fn decrement(&mut self, consumer: ConsumerId, tokens: &[InstrumentToken]) -> Vec<InstrumentToken> {
        let Some(held) = self.consumer_tokens.get_mut(&consumer) else {
            return vec![];
        };

        let mut removed = Vec::new();

        for token in tokens {
            // Skip tokens this consumer does not hold
            let Some(count) = held.get_mut(token) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                held.remove(token);
            }

            if Self::release_one(&mut self.token_refcount, token) {
                removed.push(token.clone());
            }
        }

        if held.is_empty() {
            self.consumer_tokens.remove(&consumer);
        }

        removed
    }

    fn release_consumer(&mut self, consumer: ConsumerId) -> Vec<InstrumentToken> {
        let Some(held) = self.consumer_tokens.remove(&consumer) else {
            return vec![];
        };

        let mut removed = Vec::new();
        for (token, count) in held {
            for _ in 0..count {
                if Self::release_one(&mut self.token_refcount, &token) {
                    removed.push(token.clone());
                }
            }
        }
        removed.sort();
        removed
    }

    /// Drop one reference; returns true when the token left the ledger.
    fn release_one(refcounts: &mut HashMap<InstrumentToken, usize>, token: &InstrumentToken) -> bool {
        let Some(refcount) = refcounts.get_mut(token) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            refcounts.remove(token);
            return true;
        }
        false
    }
}

// =============================================================================
// Subscription Ledger
// =============================================================================

/// Thread-safe reference-counted ledger for one venue.
///
/// # Example
///
/// ```rust
/// use market_stream_mux::domain::subscription::SubscriptionLedger;
/// use market_stream_mux::domain::token::InstrumentToken;
///
/// let ledger = SubscriptionLedger::new();
/// let aapl = InstrumentToken::parse("NASDAQ:AAPL").unwrap();
///
/// // Two consumers want AAPL - only the first changes the key set
/// assert_eq!(ledger.increment(1, &[aapl.clone()]).added, vec![aapl.clone()]);
/// assert!(ledger.increment(2, &[aapl.clone()]).is_empty());
/// assert_eq!(ledger.count(&aapl), 2);
///
/// // Consumer 1 leaves - AAPL is still wanted by consumer 2
/// assert!(ledger.decrement(1, &[aapl.clone()]).is_empty());
///
/// // Consumer 2 leaves - AAPL leaves the ledger
/// assert_eq!(ledger.decrement(2, &[aapl.clone()]).removed, vec![aapl]);
/// assert!(ledger.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    state: RwLock<LedgerState>,
}

impl SubscriptionLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference per token for a consumer.
    ///
    /// Returns the tokens that entered the ledger.
    pub fn increment(&self, consumer: ConsumerId, tokens: &[InstrumentToken]) -> LedgerChanges {
        LedgerChanges {
            added: self.state.write().increment(consumer, tokens),
            removed: vec![],
        }
    }

    /// Drop one reference per token held by a consumer.
    ///
    /// Tokens the consumer does not hold are ignored. Returns the tokens
    /// that left the ledger.
    pub fn decrement(&self, consumer: ConsumerId, tokens: &[InstrumentToken]) -> LedgerChanges {
        LedgerChanges {
            added: vec![],
            removed: self.state.write().decrement(consumer, tokens),
        }
    }

    /// Drop every reference a consumer holds.
    pub fn release_consumer(&self, consumer: ConsumerId) -> LedgerChanges {
        LedgerChanges {
            added: vec![],
            removed: self.state.write().release_consumer(consumer),
        }
    }

    /// Current reference count for a token (0 if absent).
    #[must_use]
    pub fn count(&self, token: &InstrumentToken) -> usize {
        self.state.read().token_refcount.get(token).copied().unwrap_or(0)
    }

    /// Tokens held by one consumer with their counts.
    #[must_use]
    pub fn consumer_tokens(&self, consumer: ConsumerId) -> HashMap<InstrumentToken, usize> {
        self.state
            .read()
            .consumer_tokens
            .get(&consumer)
            .cloned()
            .unwrap_or_default()
    }

    /// The desired key set, sorted.
    #[must_use]
    pub fn desired(&self) -> BTreeSet<InstrumentToken> {
        self.state.read().token_refcount.keys().cloned().collect()
    }

    /// Whether nothing is wanted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().token_refcount.is_empty()
    }

    /// Ledger statistics.
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let state = self.state.read();
        LedgerStats {
            token_count: state.token_refcount.len(),
            consumer_count: state.consumer_tokens.len(),
            total_refs: state.token_refcount.values().sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
