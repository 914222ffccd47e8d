//! WebSocket Transport Adapter
//!
//! Implements the transport ports over `tokio-tungstenite`. Protocol-level
//! pings from the server are answered by tungstenite itself; pongs are
//! surfaced so the supervisor's heartbeat sees them.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    InboundMessage, StreamConnector, StreamTransport, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamTransport>, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { ws }))
    }
}

/// One open WebSocket connection.
pub struct WsTransport {
    ws: WsStream,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(InboundMessage::Text(text.to_string()))),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(InboundMessage::Text(text))),
                    Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Pong(_)) => return Some(Ok(InboundMessage::Pong)),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.ws
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
