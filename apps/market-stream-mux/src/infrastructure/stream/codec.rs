//! Stream Codec Module
//!
//! JSON encoding of outbound wire commands and decoding of inbound frames.
//!
//! Every inbound text frame is a single JSON object routed by its `type`
//! field. [`JsonCodec::decode`] only checks shape; the [`StreamCodec`]
//! implementation also resolves symbols and checks numeric sanity, turning
//! each frame into a [`StreamEvent`].

use chrono::{DateTime, Utc};

use crate::application::ports::{EncodeError, FrameRejection, StreamCodec};
use crate::domain::streaming::StreamEvent;
use crate::domain::subscription::WireOp;
use crate::domain::token::{InstrumentToken, SymbolResolver};
use crate::infrastructure::stream::messages::{
    BackfillFrame, BarFrame, ErrorFrame, FrameError, TickFrame, TradeFrame, WireCommand,
};

/// Status payload kinds stored verbatim.
pub const STATUS_KINDS: &[&str] = &["provider_health", "market_status", "status"];

/// Control acknowledgement kinds.
pub const ACK_KINDS: &[&str] = &["ready", "subscribed", "unsubscribed", "pong"];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("expected a JSON object")]
    NotAnObject,

    /// Object has no string `type` field.
    #[error("missing message type")]
    MissingType,

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

impl CodecError {
    /// Label for the dropped-frames counter.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Json(_) => "malformed",
            Self::NotAnObject => "not_object",
            Self::MissingType => "missing_type",
            Self::UnknownMessageType(_) => "unknown_type",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Tick update.
    Tick(TickFrame),
    /// Last-sale print.
    Trade(TradeFrame),
    /// Bar or candle update.
    Bar(BarFrame),
    /// Closed-bar history.
    Backfill(BackfillFrame),
    /// Side-channel status payload, kept verbatim.
    Status {
        /// The `type` value.
        kind: String,
        /// The whole frame.
        payload: serde_json::Value,
    },
    /// Control acknowledgement.
    Ack(String),
    /// Server-reported error.
    Error(ErrorFrame),
}

impl InboundFrame {
    /// Label for the received-frames counter.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick(_) => "tick",
            Self::Trade(_) => "trade",
            Self::Bar(_) => "bar",
            Self::Backfill(_) => "backfill",
            Self::Status { .. } => "status",
            Self::Ack(_) => "ack",
            Self::Error(_) => "error",
        }
    }
}

/// JSON codec for the quotes stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the text is not a JSON object, has no
    /// `type`, has an unknown `type`, or its fields do not match the type.
    pub fn decode_frame(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        if !value.is_object() {
            return Err(CodecError::NotAnObject);
        }

        let msg_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?
            .to_string();

        let frame = match msg_type.as_str() {
            "tick" => InboundFrame::Tick(serde_json::from_value(value)?),
            "trade" => InboundFrame::Trade(serde_json::from_value(value)?),
            "bar" | "candle" => InboundFrame::Bar(serde_json::from_value(value)?),
            "backfill" => InboundFrame::Backfill(serde_json::from_value(value)?),
            "error" => InboundFrame::Error(serde_json::from_value(value)?),
            kind if STATUS_KINDS.contains(&kind) => InboundFrame::Status {
                kind: msg_type,
                payload: value,
            },
            kind if ACK_KINDS.contains(&kind) => InboundFrame::Ack(msg_type),
            _ => return Err(CodecError::UnknownMessageType(msg_type)),
        };

        Ok(frame)
    }

    /// Encode a wire command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_command(&self, command: &WireCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }
}

impl StreamCodec for JsonCodec {
    fn encode(&self, op: WireOp, tokens: &[InstrumentToken]) -> Result<String, EncodeError> {
        self.encode_command(&WireCommand::new(op, tokens))
            .map_err(|e| EncodeError(e.to_string()))
    }

    fn decode(
        &self,
        text: &str,
        resolver: &SymbolResolver,
        received_at: DateTime<Utc>,
    ) -> Result<StreamEvent, FrameRejection> {
        let frame = self
            .decode_frame(text)
            .map_err(|e| FrameRejection::new(e.reason(), e.to_string()))?;
        let kind = frame.kind();
        let reject = |e: FrameError| FrameRejection::new(e.reason(), format!("{kind}: {e}"));

        let event = match frame {
            InboundFrame::Tick(tick) => {
                StreamEvent::Tick(tick.into_record(resolver, received_at).map_err(reject)?)
            }
            InboundFrame::Trade(trade) => {
                StreamEvent::Tick(trade.into_record(resolver, received_at).map_err(reject)?)
            }
            InboundFrame::Bar(bar) => {
                StreamEvent::Bar(bar.into_record(resolver).map_err(reject)?)
            }
            InboundFrame::Backfill(frame) => {
                let backfill = frame.into_backfill(resolver).map_err(reject)?;
                StreamEvent::Backfill {
                    token: backfill.token,
                    interval: backfill.interval,
                    bars: backfill.bars,
                    skipped: backfill.skipped,
                }
            }
            InboundFrame::Status { kind, payload } => StreamEvent::Status { kind, payload },
            InboundFrame::Ack(kind) => StreamEvent::Ack(kind),
            InboundFrame::Error(err) => StreamEvent::ServerError(err.message),
        };
        Ok(event)
    }
}
