//! Heartbeat Monitor
//!
//! Tracks connection liveness through periodic pings. Any inbound traffic
//! counts as a sign of life; a ping left unanswered past the timeout marks
//! the connection dead.

use std::time::Duration;

use tokio::time::Instant;

/// Shortest ping interval a monitor will run with.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    ///
    /// `ping_interval` is raised to [`MIN_PING_INTERVAL`].
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
        .clamped()
    }

    /// This configuration with `ping_interval` raised to [`MIN_PING_INTERVAL`].
    #[must_use]
    pub const fn clamped(self) -> Self {
        let ping_interval = if self.ping_interval.as_nanos() < MIN_PING_INTERVAL.as_nanos() {
            MIN_PING_INTERVAL
        } else {
            self.ping_interval
        };
        Self {
            ping_interval,
            pong_timeout: self.pong_timeout,
        }
    }
}

/// What the supervisor should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    SendPing,
    /// Ping already outstanding and still within the timeout.
    Wait,
    /// The connection is dead.
    Timeout,
}

/// Per-connection liveness state.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor for a freshly opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config: config.clamped(),
            last_activity: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Record inbound traffic (a frame or a pong).
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.ping_sent_at = None;
    }

    /// Record that a ping was sent.
    pub fn mark_ping_sent(&mut self) {
        self.ping_sent_at = Some(Instant::now());
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Decide what to do on a heartbeat tick.
    #[must_use]
    pub fn on_tick(&self) -> HeartbeatAction {
        match self.ping_sent_at {
            None => HeartbeatAction::SendPing,
            Some(sent) if sent.elapsed() >= self.config.pong_timeout => HeartbeatAction::Timeout,
            Some(_) => HeartbeatAction::Wait,
        }
    }
}
