//! Port Interfaces
//!
//! Defines the transport and wire-format seams following the Hexagonal
//! Architecture pattern. The supervisor only ever talks to these traits;
//! the adapters in `infrastructure::stream` and in-memory fakes in tests
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector`: Opens one transport per connection attempt
//! - `StreamTransport`: A single open streaming connection
//! - `StreamCodec`: Encodes wire commands and decodes inbound frames

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::streaming::StreamEvent;
use crate::domain::subscription::WireOp;
use crate::domain::token::{InstrumentToken, SymbolResolver};

// =============================================================================
// Errors
// =============================================================================

/// Transport failures. Every variant is treated as a close by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached or the handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
    /// No frame or pong arrived within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

/// An inbound frame that could not be turned into a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct FrameRejection {
    /// Label for the dropped-frames counter.
    pub reason: &'static str,
    /// What was wrong.
    pub detail: String,
}

impl FrameRejection {
    /// Create a rejection.
    #[must_use]
    pub fn new(reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// A wire command that could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encode failed: {0}")]
pub struct EncodeError(pub String);

// =============================================================================
// Messages
// =============================================================================

/// A frame read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A text frame carrying JSON.
    Text(String),
    /// A heartbeat reply.
    Pong,
}

// =============================================================================
// Ports
// =============================================================================

/// One open streaming connection.
///
/// `recv` must be cancel-safe: the supervisor polls it inside
/// `tokio::select!` alongside timers and wake signals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamTransport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next frame. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<InboundMessage, TransportError>>;

    /// Send a heartbeat ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection. Errors while closing are ignored.
    async fn close(&mut self);
}

/// Factory for transports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a transport to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamTransport>, TransportError>;
}

/// Wire format of a venue stream.
#[cfg_attr(test, mockall::automock)]
pub trait StreamCodec: Send + Sync {
    /// Encode one batched subscribe or unsubscribe command.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the command cannot be serialized.
    fn encode(&self, op: WireOp, tokens: &[InstrumentToken]) -> Result<String, EncodeError>;

    /// Decode and validate one text frame.
    ///
    /// `received_at` stands in for a missing timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`FrameRejection`] for frames to drop.
    fn decode(
        &self,
        text: &str,
        resolver: &SymbolResolver,
        received_at: DateTime<Utc>,
    ) -> Result<StreamEvent, FrameRejection>;
}
