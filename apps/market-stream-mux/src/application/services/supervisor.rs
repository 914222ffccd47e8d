//! Connection Supervisor
//!
//! Owns one venue's transport lifecycle: connect on demand, reconcile the
//! wire set, dispatch inbound frames, keep the connection alive with
//! heartbeats, and reconnect with backoff after any failure.
//!
//! # Design
//!
//! The supervisor is a single task driven by a [`Notify`] wake signal. Each
//! ledger mutation that changes the key set notifies it; a burst of
//! mutations before the task runs collapses into one stored permit, so one
//! reconcile pass covers all of them and sends at most one batch per
//! operation.
//!
//! Any transport error is treated as a close. When the ledger empties the
//! supervisor sends the final unsubscribe, closes the transport, and idles
//! until the next subscribe.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::dispatcher::FrameDispatcher;
use super::reconciler::WireReconciler;
use super::status::StreamStatus;
use crate::application::metrics;
use crate::application::ports::{
    InboundMessage, StreamCodec, StreamConnector, StreamTransport, TransportError,
};
use crate::domain::connection::{
    ConnectionEvent, ConnectionMachine, ConnectionPhase, HeartbeatAction, HeartbeatConfig,
    HeartbeatMonitor, ReconnectConfig,
};
use crate::domain::subscription::SubscriptionLedger;
use crate::domain::token::Venue;
use crate::infrastructure::store::MarketStore;

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor settings for one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Streaming endpoint URL.
    pub url: String,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
}

impl SupervisorConfig {
    /// Create a configuration with default backoff and heartbeat.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Shared handles the supervisor works on.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    /// Venue served.
    pub venue: Venue,
    /// Desired key set.
    pub ledger: Arc<SubscriptionLedger>,
    /// Wake signal raised by ledger mutations.
    pub wake: Arc<Notify>,
    /// Store written by the dispatcher.
    pub store: Arc<MarketStore>,
    /// Status snapshot.
    pub status: Arc<StreamStatus>,
}

/// How a connected session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// Shutdown requested.
    Cancelled,
    /// The ledger emptied; transport closed deliberately.
    Released,
    /// The transport failed or closed.
    Lost(String),
}

// =============================================================================
// Supervisor
// =============================================================================

/// Connection supervisor for one venue.
pub struct ConnectionSupervisor<C> {
    ctx: SupervisorContext,
    connector: C,
    config: SupervisorConfig,
    cancel: CancellationToken,
    machine: ConnectionMachine,
    reconciler: WireReconciler,
    dispatcher: FrameDispatcher,
}

impl<C: StreamConnector> ConnectionSupervisor<C> {
    /// Create a supervisor. Nothing happens until [`run`](Self::run).
    ///
    /// `codec` is the wire format spoken over transports from `connector`.
    #[must_use]
    pub fn new(
        ctx: SupervisorContext,
        connector: C,
        codec: Arc<dyn StreamCodec>,
        config: SupervisorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            machine: ConnectionMachine::new(config.reconnect),
            reconciler: WireReconciler::new(ctx.venue.id(), Arc::clone(&codec)),
            dispatcher: FrameDispatcher::new(ctx.venue.clone(), Arc::clone(&ctx.store), codec),
            ctx,
            connector,
            config,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        tracing::info!(venue = %self.ctx.venue, url = %self.config.url, "Stream supervisor started");
        self.publish(self.machine.phase());

        loop {
            self.refresh_demand();

            match self.machine.phase() {
                ConnectionPhase::Idle => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = self.ctx.wake.notified() => {}
                    }
                }
                ConnectionPhase::Connecting { attempt } => {
                    if !self.connect(attempt).await {
                        break;
                    }
                }
                ConnectionPhase::Backoff { attempt, delay } => {
                    if !self.backoff(attempt, delay).await {
                        break;
                    }
                }
                ConnectionPhase::Connected => {
                    // Sessions always end in another phase
                    self.transition(ConnectionEvent::Closed);
                }
            }
        }

        self.reconciler.reset();
        self.ctx
            .store
            .set_connection(self.ctx.venue.id(), ConnectionPhase::Idle.state());
        self.ctx.status.set_phase(ConnectionPhase::Idle, 0);
        metrics::set_connected(self.ctx.venue.id(), false);
        tracing::info!(venue = %self.ctx.venue, "Stream supervisor stopped");
    }

    /// Align the machine's wanted flag with the ledger.
    fn refresh_demand(&mut self) {
        let wanted = !self.ctx.ledger.is_empty();
        if wanted && !self.machine.is_wanted() {
            self.transition(ConnectionEvent::Demand);
        } else if !wanted && self.machine.is_wanted() {
            self.transition(ConnectionEvent::Release);
        }
    }

    fn transition(&mut self, event: ConnectionEvent) -> ConnectionPhase {
        let before = self.machine.phase();
        let after = self.machine.handle(event);
        if before != after {
            tracing::debug!(
                venue = %self.ctx.venue,
                from = before.label(),
                to = after.label(),
                ?event,
                "Connection phase changed"
            );
            self.publish(after);
        }
        after
    }

    fn publish(&self, phase: ConnectionPhase) {
        let venue = self.ctx.venue.id();
        self.ctx.store.set_connection(venue, phase.state());
        self.ctx.status.set_phase(phase, self.machine.attempts());
        metrics::set_connected(venue, phase == ConnectionPhase::Connected);
    }

    /// Returns `false` on shutdown.
    async fn connect(&mut self, attempt: u32) -> bool {
        tracing::info!(venue = %self.ctx.venue, url = %self.config.url, attempt, "Connecting to stream");

        let result = tokio::select! {
            () = self.cancel.cancelled() => return false,
            result = self.connector.connect(&self.config.url) => result,
        };

        match result {
            Ok(transport) => {
                self.transition(ConnectionEvent::Opened);
                tracing::info!(venue = %self.ctx.venue, "Stream connected");

                match self.session(transport).await {
                    SessionEnd::Cancelled => return false,
                    SessionEnd::Released => {
                        tracing::info!(venue = %self.ctx.venue, "No subscriptions left, connection closed");
                        self.transition(ConnectionEvent::Release);
                    }
                    SessionEnd::Lost(reason) => {
                        tracing::warn!(venue = %self.ctx.venue, reason = %reason, "Stream connection lost");
                        self.ctx.status.set_error(reason);
                        self.transition(ConnectionEvent::Closed);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(venue = %self.ctx.venue, error = %e, "Stream connect failed");
                self.ctx.status.set_error(e.to_string());
                self.transition(ConnectionEvent::Closed);
            }
        }
        true
    }

    /// Returns `false` on shutdown.
    async fn backoff(&mut self, attempt: u32, delay: std::time::Duration) -> bool {
        tracing::info!(
            venue = %self.ctx.venue,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting to stream"
        );
        metrics::record_reconnect(self.ctx.venue.id());

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => {
                    self.transition(ConnectionEvent::RetryDue);
                    return true;
                }
                () = self.ctx.wake.notified() => {
                    if self.ctx.ledger.is_empty() {
                        tracing::debug!(venue = %self.ctx.venue, "Reconnect cancelled, nothing wanted");
                        self.transition(ConnectionEvent::Release);
                        return true;
                    }
                }
            }
        }
    }

    async fn session(&mut self, mut transport: Box<dyn StreamTransport>) -> SessionEnd {
        self.reconciler.reset();

        if let Err(e) = self.sync(transport.as_mut()).await {
            return self.lose(transport, &e).await;
        }
        if self.ctx.ledger.is_empty() {
            transport.close().await;
            return SessionEnd::Released;
        }

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat);
        let ping_interval = heartbeat.config().ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    transport.close().await;
                    return SessionEnd::Cancelled;
                }
                () = self.ctx.wake.notified() => {
                    if let Err(e) = self.sync(transport.as_mut()).await {
                        return self.lose(transport, &e).await;
                    }
                    if self.ctx.ledger.is_empty() {
                        transport.close().await;
                        return SessionEnd::Released;
                    }
                }
                msg = transport.recv() => match msg {
                    Some(Ok(InboundMessage::Text(text))) => {
                        heartbeat.record_activity();
                        let outcome = self.dispatcher.dispatch(&text);
                        self.ctx.status.record_frame(outcome.is_dropped());
                    }
                    Some(Ok(InboundMessage::Pong)) => heartbeat.record_activity(),
                    Some(Err(e)) => return self.lose(transport, &e).await,
                    None => return self.lose(transport, &TransportError::Closed).await,
                },
                _ = ticker.tick() => match heartbeat.on_tick() {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = transport.ping().await {
                            return self.lose(transport, &e).await;
                        }
                        heartbeat.mark_ping_sent();
                    }
                    HeartbeatAction::Wait => {}
                    HeartbeatAction::Timeout => {
                        tracing::warn!(
                            venue = %self.ctx.venue,
                            silent_ms = u64::try_from(heartbeat.time_since_activity().as_millis()).unwrap_or(u64::MAX),
                            "Heartbeat timeout"
                        );
                        return self.lose(transport, &TransportError::HeartbeatTimeout).await;
                    }
                },
            }
        }
    }

    async fn lose(
        &mut self,
        mut transport: Box<dyn StreamTransport>,
        error: &TransportError,
    ) -> SessionEnd {
        transport.close().await;
        self.reconciler.reset();
        self.dispatcher.set_wanted(self.reconciler.wire());
        self.ctx.status.set_sizes(0, self.ctx.ledger.stats().token_count);
        SessionEnd::Lost(error.to_string())
    }

    async fn sync(&mut self, transport: &mut dyn StreamTransport) -> Result<(), TransportError> {
        let desired = self.ctx.ledger.desired();
        let venue = self.ctx.venue.id();
        metrics::set_ledger_tokens(venue, desired.len());

        let delta = self.reconciler.reconcile(&desired, transport).await;
        self.dispatcher.set_wanted(self.reconciler.wire());
        let delta = delta?;
        if !delta.is_empty() {
            tracing::info!(
                venue = %self.ctx.venue,
                subscribed = delta.subscribe.len(),
                unsubscribed = delta.unsubscribe.len(),
                wire = self.reconciler.wire().len(),
                "Reconciled wire subscriptions"
            );
        }
        self.ctx
            .status
            .set_sizes(self.reconciler.wire().len(), desired.len());
        Ok(())
    }
}

impl<C> std::fmt::Debug for ConnectionSupervisor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("venue", &self.ctx.venue.id())
            .field("url", &self.config.url)
            .field("phase", &self.machine.phase())
            .finish_non_exhaustive()
    }
}
