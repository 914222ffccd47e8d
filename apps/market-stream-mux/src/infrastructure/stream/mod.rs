//! Quotes Stream Adapters
//!
//! Wire-level pieces of the venue streams:
//!
//! - `messages`: JSON frame types and validation into records
//! - `codec`: frame decoding by `type` and command encoding
//! - `endpoint`: streaming URL derivation from the API base
//! - `client`: WebSocket transport over `tokio-tungstenite`

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod messages;

pub use client::{WsConnector, WsTransport};
pub use codec::{CodecError, InboundFrame, JsonCodec};
pub use endpoint::{EndpointError, stream_url};
pub use messages::{FrameError, WireCommand, WireOp};
