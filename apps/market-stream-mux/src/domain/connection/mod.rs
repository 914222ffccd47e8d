//! Connection State Machine
//!
//! Explicit lifecycle of one venue's streaming connection, independent of
//! any transport, plus the backoff and heartbeat timing it relies on.
//!
//! # Design
//!
//! ```text
//!            Demand                 Opened
//!   Idle ───────────► Connecting ───────────► Connected
//!    ▲                  │   ▲                    │
//!    │ Release          │   │ RetryDue           │ Closed (still wanted)
//!    │                  ▼   │                    ▼
//!    └─────────────── Backoff ◄──────────────────┘
//! ```
//!
//! `Release` from any phase returns to `Idle` and resets the backoff
//! counter; `Closed` while unwanted also lands in `Idle`. Events that make
//! no sense for the current phase leave it unchanged.

mod heartbeat;
mod reconnect;

use std::time::Duration;

pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor, MIN_PING_INTERVAL};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

use super::streaming::ConnectionState;

// =============================================================================
// Phases and Events
// =============================================================================

/// Supervisor phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No transport and nothing wanted.
    #[default]
    Idle,
    /// Opening a transport.
    Connecting {
        /// Reconnect attempt (0 for the first connect after idle).
        attempt: u32,
    },
    /// Transport open.
    Connected,
    /// Waiting before the next connect attempt.
    Backoff {
        /// Attempt that will run when the delay elapses.
        attempt: u32,
        /// Delay before that attempt.
        delay: Duration,
    },
}

impl ConnectionPhase {
    /// Connection state published to consumers.
    #[must_use]
    pub const fn state(self) -> ConnectionState {
        match self {
            Self::Idle | Self::Backoff { .. } => ConnectionState::Disconnected,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
        }
    }

    /// Short label for logs and health output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Backoff { .. } => "backoff",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The ledger became non-empty.
    Demand,
    /// The ledger became empty.
    Release,
    /// The transport opened.
    Opened,
    /// The transport closed or failed.
    Closed,
    /// The backoff delay elapsed.
    RetryDue,
}

// =============================================================================
// Machine
// =============================================================================

/// Connection lifecycle with backoff bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    phase: ConnectionPhase,
    wanted: bool,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    /// Create an idle machine.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            wanted: false,
            policy: ReconnectPolicy::new(config),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether a connection is wanted.
    #[must_use]
    pub const fn is_wanted(&self) -> bool {
        self.wanted
    }

    /// Published connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// Apply an event and return the resulting phase.
    pub fn handle(&mut self, event: ConnectionEvent) -> ConnectionPhase {
        use ConnectionEvent as E;
        use ConnectionPhase as P;

        let next = match (self.phase, event) {
            (P::Idle, E::Demand) => {
                self.wanted = true;
                P::Connecting { attempt: 0 }
            }
            (_, E::Demand) => {
                self.wanted = true;
                self.phase
            }
            (_, E::Release) => {
                self.wanted = false;
                self.policy.reset();
                P::Idle
            }
            (P::Connecting { .. }, E::Opened) => {
                self.policy.reset();
                P::Connected
            }
            (P::Connecting { .. } | P::Connected, E::Closed) if self.wanted => {
                let delay = self.policy.next_delay();
                P::Backoff {
                    attempt: self.policy.attempt_count(),
                    delay,
                }
            }
            (P::Connecting { .. } | P::Connected, E::Closed) => P::Idle,
            (P::Backoff { attempt, .. }, E::RetryDue) => P::Connecting { attempt },
            _ => self.phase,
        };

        self.phase = next;
        next
    }
}
