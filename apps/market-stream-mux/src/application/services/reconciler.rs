//! Wire Reconciler
//!
//! Converges the set of tokens subscribed on the wire toward the ledger's
//! desired set with at most one batched command per operation.
//!
//! The wire set only changes for commands that were actually sent. After a
//! reconnect the supervisor calls [`WireReconciler::reset`], so the next
//! pass resends the whole desired set.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::metrics;
use crate::application::ports::{StreamCodec, StreamTransport, TransportError};
use crate::domain::subscription::WireOp;
use crate::domain::token::InstrumentToken;

/// Tokens to add to and remove from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireDelta {
    /// `desired - wire`, sorted.
    pub subscribe: Vec<InstrumentToken>,
    /// `wire - desired`, sorted.
    pub unsubscribe: Vec<InstrumentToken>,
}

impl WireDelta {
    /// Whether the wire already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Tracks the wire subscription set for one connection.
pub struct WireReconciler {
    venue: String,
    wire: BTreeSet<InstrumentToken>,
    codec: Arc<dyn StreamCodec>,
}

impl WireReconciler {
    /// Create a reconciler with an empty wire set.
    #[must_use]
    pub fn new(venue: &str, codec: Arc<dyn StreamCodec>) -> Self {
        Self {
            venue: venue.to_string(),
            wire: BTreeSet::new(),
            codec,
        }
    }

    /// Tokens last sent as subscribed.
    #[must_use]
    pub const fn wire(&self) -> &BTreeSet<InstrumentToken> {
        &self.wire
    }

    /// Forget the wire set; the next pass resends everything.
    pub fn reset(&mut self) {
        self.wire.clear();
    }

    /// Compute the delta against `desired` without sending anything.
    #[must_use]
    pub fn plan(&self, desired: &BTreeSet<InstrumentToken>) -> WireDelta {
        WireDelta {
            subscribe: desired.difference(&self.wire).cloned().collect(),
            unsubscribe: self.wire.difference(desired).cloned().collect(),
        }
    }

    /// Send the delta over `transport` and update the wire set.
    ///
    /// Subscribe goes first, then unsubscribe. If a send fails, the wire
    /// set reflects only what was sent before the failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] from the transport.
    pub async fn reconcile(
        &mut self,
        desired: &BTreeSet<InstrumentToken>,
        transport: &mut dyn StreamTransport,
    ) -> Result<WireDelta, TransportError> {
        let delta = self.plan(desired);

        if !delta.subscribe.is_empty() {
            self.send(transport, WireOp::Subscribe, &delta.subscribe)
                .await?;
            self.wire.extend(delta.subscribe.iter().cloned());
        }

        if !delta.unsubscribe.is_empty() {
            self.send(transport, WireOp::Unsubscribe, &delta.unsubscribe)
                .await?;
            for token in &delta.unsubscribe {
                self.wire.remove(token);
            }
        }

        Ok(delta)
    }

    async fn send(
        &self,
        transport: &mut dyn StreamTransport,
        op: WireOp,
        tokens: &[InstrumentToken],
    ) -> Result<(), TransportError> {
        let text = self
            .codec
            .encode(op, tokens)
            .map_err(|e| TransportError::Send(e.to_string()))?;

        tracing::debug!(venue = %self.venue, op = op.as_str(), tokens = tokens.len(), "Sending wire command");
        transport.send(text).await?;
        metrics::record_wire_command(&self.venue, op.as_str());
        Ok(())
    }
}

impl std::fmt::Debug for WireReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireReconciler")
            .field("venue", &self.venue)
            .field("wire", &self.wire)
            .finish_non_exhaustive()
    }
}
