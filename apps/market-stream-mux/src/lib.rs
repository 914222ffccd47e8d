#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Mux - Live Market Data Subscription Multiplexer
//!
//! Keeps one WebSocket connection per market venue and shares it among any
//! number of in-process consumers. Consumers declare interest in instrument
//! tokens; a reference-counted ledger decides what must be on the wire, and
//! a supervisor reconciles the wire with it, reconnecting with backoff and
//! re-subscribing the full set after every reconnect.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `token`: Instrument tokens, venues, and normalization
//!   - `subscription`: Reference-counted subscription ledger
//!   - `streaming`: Tick and bar records, bar series rules
//!   - `connection`: Connection state machine, backoff, heartbeat
//!   - `coalesce`: Latest-value coalescer for high-rate UI events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport and wire-format seams (`StreamConnector`,
//!     `StreamTransport`, `StreamCodec`)
//!   - `services`: Subscriber facade, wire reconciler, supervisor, dispatcher
//!   - `metrics`: Metric recording over the `metrics` facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `store`: Shared market store with key-scoped notification
//!   - `stream`: WebSocket adapter, JSON codec, endpoint derivation
//!   - `config`: Environment-driven configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Subscriber A ──┐ subscribe/unsubscribe
//! Subscriber B ──┼──────────────► Ledger ──wake──► Supervisor ──► venue WS
//! Subscriber N ──┘                                     │
//!      ▲                                               │ frames
//!      │ point reads, key watches                      ▼
//!      └──────────────────── MarketStore ◄────── Dispatcher
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::coalesce::{CrosshairEvent, LatestCoalescer};
pub use domain::connection::{
    ConnectionEvent, ConnectionMachine, ConnectionPhase, HeartbeatConfig, ReconnectConfig,
    ReconnectPolicy,
};
pub use domain::streaming::{
    BarRecord, BarSeries, BarStatus, ConnectionState, StreamEvent, TickRecord,
};
pub use domain::subscription::{
    ConsumerId, LedgerChanges, LedgerStats, SubscriptionLedger, WireOp,
};
pub use domain::token::{InstrumentToken, SymbolResolver, TokenError, Venue};

// Application services
pub use application::ports::{
    EncodeError, FrameRejection, InboundMessage, StreamCodec, StreamConnector, StreamTransport,
    TransportError,
};
pub use application::services::{
    ConnectionSupervisor, DispatchOutcome, FrameDispatcher, MarketStream, StreamStatus,
    StreamStatusSnapshot, Subscriber, SupervisorConfig, WireDelta, WireReconciler,
    spawn_frame_driver,
};

// Store
pub use infrastructure::store::{
    KeyWatcher, MarketStore, StoreChange, StoreConfig, StoreKey, TickListener,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, MuxConfig, ServerSettings, StoreSettings, WebSocketSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// WebSocket adapter
pub use infrastructure::stream::{JsonCodec, WsConnector, WsTransport};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
