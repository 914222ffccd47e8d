//! In-memory transport used to drive the supervisor end to end.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

use market_stream_mux::infrastructure::stream::WireCommand;
use market_stream_mux::{
    HeartbeatConfig, InboundMessage, InstrumentToken, JsonCodec, MarketStore, MarketStream,
    ReconnectConfig, StreamCodec, StreamConnector, StreamTransport, SupervisorConfig,
    TransportError, Venue,
};

/// Upper bound for anything a test waits on. Time is paused, so this only
/// trips when the supervisor is genuinely stuck.
pub const WAIT: Duration = Duration::from_secs(120);

type Inbound = Result<InboundMessage, TransportError>;

// =============================================================================
// Connector
// =============================================================================

/// Connector half handed to the supervisor.
pub struct FakeConnector {
    links_tx: mpsc::UnboundedSender<ServerEnd>,
    shared: Arc<Shared>,
}

struct Shared {
    failures: AtomicU32,
    answer_pings: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

/// Test half: accepts connections and controls failures.
pub struct FakeServer {
    links_rx: mpsc::UnboundedReceiver<ServerEnd>,
    shared: Arc<Shared>,
}

/// Create a connected connector/server pair.
pub fn fake_network() -> (FakeConnector, FakeServer) {
    let (links_tx, links_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        failures: AtomicU32::new(0),
        answer_pings: AtomicBool::new(true),
        attempts: Mutex::new(Vec::new()),
    });
    (
        FakeConnector {
            links_tx,
            shared: Arc::clone(&shared),
        },
        FakeServer { links_rx, shared },
    )
}

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn StreamTransport>, TransportError> {
        self.shared.attempts.lock().push(Instant::now());

        let pending = self.shared.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.shared.failures.store(pending - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = FakeTransport {
            sent_tx,
            inbound_rx,
            inbound_tx: inbound_tx.clone(),
            closed: Arc::clone(&closed),
            answer_pings: self.shared.answer_pings.load(Ordering::SeqCst),
        };
        let _ = self.links_tx.send(ServerEnd {
            sent_rx,
            inbound_tx,
            closed,
        });
        Ok(Box::new(transport))
    }
}

impl FakeServer {
    /// Wait for the supervisor's next successful connection.
    pub async fn accept(&mut self) -> ServerEnd {
        timeout(WAIT, self.links_rx.recv())
            .await
            .expect("no connection opened")
            .expect("connector dropped")
    }

    /// Assert no connection opens within `wait`.
    pub async fn assert_no_connection(&mut self, wait: Duration) {
        if let Ok(Some(_)) = timeout(wait, self.links_rx.recv()).await {
            panic!("unexpected connection");
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.shared.failures.store(n, Ordering::SeqCst);
    }

    /// Stop answering pings on connections opened from now on.
    pub fn ignore_pings(&self) {
        self.shared.answer_pings.store(false, Ordering::SeqCst);
    }

    /// Times of every connection attempt, successful or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared.attempts.lock().clone()
    }
}

// =============================================================================
// Transport
// =============================================================================

struct FakeTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
    answer_pings: bool,
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent_tx
            .send(text)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.recv().await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.answer_pings {
            let _ = self.inbound_tx.send(Ok(InboundMessage::Pong));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one open connection.
pub struct ServerEnd {
    sent_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Next command the supervisor wrote.
    pub async fn next_command(&mut self) -> WireCommand {
        let text = timeout(WAIT, self.sent_rx.recv())
            .await
            .expect("no command sent")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("command is valid JSON")
    }

    /// Assert nothing is written within `wait`.
    pub async fn assert_quiet(&mut self, wait: Duration) {
        if let Ok(Some(text)) = timeout(wait, self.sent_rx.recv()).await {
            panic!("unexpected command: {text}");
        }
    }

    /// Deliver a text frame to the supervisor.
    pub fn push(&self, frame: &str) {
        let _ = self.inbound_tx.send(Ok(InboundMessage::Text(frame.to_string())));
    }

    /// Fail the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self
            .inbound_tx
            .send(Err(TransportError::Receive("connection reset".to_string())));
    }

    /// Whether the supervisor closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the supervisor closes this connection.
    pub async fn wait_closed(&self) {
        timeout(WAIT, async {
            while !self.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection never closed");
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A running supervisor over the fake network.
pub struct Harness {
    pub stream: MarketStream,
    pub server: FakeServer,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Harness {
    /// Start a US venue supervisor with deterministic backoff.
    pub fn start() -> Self {
        Self::start_with(HeartbeatConfig::new(
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        ))
    }

    /// Start with custom heartbeat timing.
    pub fn start_with(heartbeat: HeartbeatConfig) -> Self {
        let (connector, server) = fake_network();
        let stream = MarketStream::new(Venue::us(), Arc::new(MarketStore::default()));
        let cancel = CancellationToken::new();
        let config = SupervisorConfig {
            url: "ws://fake/api/ws/us-quotes".to_string(),
            reconnect: ReconnectConfig::new(
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::ZERO,
            ),
            heartbeat,
        };
        let task = tokio::spawn(
            stream
                .supervisor(connector, codec(), config, cancel.clone())
                .run(),
        );
        Self {
            stream,
            server,
            cancel,
            task,
        }
    }

    /// Push a tick for `barrier` and wait until the store has applied it.
    /// Frames are handled in order, so everything pushed before is applied.
    pub async fn flush(&self, link: &ServerEnd, barrier: &str) {
        let mut listener = self.stream.store().tick_listener();
        link.push(&format!(r#"{{"type":"tick","symbol":"{barrier}","ltp":1.0}}"#));
        timeout(WAIT, async {
            while let Some(tick) = listener.recv().await {
                if tick.token.as_str() == barrier {
                    return;
                }
            }
        })
        .await
        .expect("barrier tick never applied");
    }
}

/// The JSON wire format used by every fake connection.
pub fn codec() -> Arc<dyn StreamCodec> {
    Arc::new(JsonCodec::new())
}

/// Parse a token, panicking on bad input.
pub fn tok(raw: &str) -> InstrumentToken {
    InstrumentToken::parse(raw).unwrap()
}

/// Command symbols as plain strings.
pub fn symbols(command: &WireCommand) -> Vec<&str> {
    command.symbols.iter().map(String::as_str).collect()
}
