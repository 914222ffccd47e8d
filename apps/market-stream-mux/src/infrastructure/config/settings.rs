//! Multiplexer Configuration Settings
//!
//! Configuration types for the stream multiplexer, loaded from environment
//! variables. Every reader goes through a key lookup so tests can supply a
//! map instead of mutating the process environment.

use std::time::Duration;

use url::Url;

use crate::application::services::SupervisorConfig;
use crate::domain::connection::{HeartbeatConfig, ReconnectConfig};
use crate::domain::token::{InstrumentToken, Venue};
use crate::infrastructure::store::StoreConfig;
use crate::infrastructure::stream::{EndpointError, stream_url};
use crate::infrastructure::stream::endpoint::parse_api_base;

const DEFAULT_API_BASE: &str = "http://localhost:8000/api";
const DEFAULT_VENUES: &str = "india,us";

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Time allowed for a pong after a ping.
    pub heartbeat_timeout: Duration,
    /// Base reconnection delay.
    pub reconnect_base: Duration,
    /// Maximum reconnection delay.
    pub reconnect_cap: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub reconnect_jitter: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        let heartbeat = HeartbeatConfig::default();
        Self {
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.pong_timeout,
            reconnect_base: reconnect.base_delay,
            reconnect_cap: reconnect.max_delay,
            reconnect_jitter: reconnect.jitter_max,
        }
    }
}

impl WebSocketSettings {
    /// Backoff settings for the supervisor.
    #[must_use]
    pub const fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::new(self.reconnect_base, self.reconnect_cap, self.reconnect_jitter)
    }

    /// Heartbeat settings for the supervisor.
    #[must_use]
    pub const fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(self.heartbeat_interval, self.heartbeat_timeout)
    }
}

/// Store sizing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Closed bars kept per token and interval.
    pub max_closed_bars: usize,
    /// Raw tick broadcast capacity.
    pub tick_channel_capacity: usize,
    /// Key change broadcast capacity.
    pub change_channel_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            max_closed_bars: store.max_closed_bars,
            tick_channel_capacity: store.tick_channel_capacity,
            change_channel_capacity: store.change_channel_capacity,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

impl ServerSettings {
    /// Whether the health server should be started.
    #[must_use]
    pub const fn health_enabled(&self) -> bool {
        self.health_port != 0
    }
}

/// Complete multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// REST API base the streaming endpoints are derived from.
    pub api_base: Url,
    /// Venues to run a supervisor for, in configured order.
    pub venues: Vec<Venue>,
    /// Symbols subscribed at startup.
    pub symbols: Vec<String>,
    /// Server port settings.
    pub server: ServerSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Store sizing settings.
    pub store: StoreSettings,
}

impl MuxConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the API base is invalid or no known venue is
    /// configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`MuxConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_base = lookup("MARKET_API_BASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = parse_api_base(&raw_base)?;

        let venues = parse_venues(
            &lookup("STREAM_VENUES").unwrap_or_else(|| DEFAULT_VENUES.to_string()),
        )?;

        // Reject bases that cannot be upgraded to a streaming scheme up front.
        for venue in &venues {
            stream_url(&api_base, venue.stream_path())?;
        }

        let symbols = lookup("STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        let server = ServerSettings {
            health_port: parse_or(&lookup, "STREAM_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_duration_secs(
                &lookup,
                "STREAM_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_base: parse_duration_millis(
                &lookup,
                "STREAM_RECONNECT_BASE_MS",
                defaults.reconnect_base,
            ),
            reconnect_cap: parse_duration_millis(
                &lookup,
                "STREAM_RECONNECT_CAP_MS",
                defaults.reconnect_cap,
            ),
            reconnect_jitter: parse_duration_millis(
                &lookup,
                "STREAM_RECONNECT_JITTER_MS",
                defaults.reconnect_jitter,
            ),
        };

        let defaults = StoreSettings::default();
        let store = StoreSettings {
            max_closed_bars: parse_or(&lookup, "STREAM_MAX_CLOSED_BARS", defaults.max_closed_bars),
            tick_channel_capacity: parse_or(
                &lookup,
                "STREAM_TICK_CHANNEL_CAPACITY",
                defaults.tick_channel_capacity,
            ),
            change_channel_capacity: parse_or(
                &lookup,
                "STREAM_CHANGE_CHANNEL_CAPACITY",
                defaults.change_channel_capacity,
            ),
        };

        Ok(Self {
            api_base,
            venues,
            symbols,
            server,
            websocket,
            store,
        })
    }

    /// Streaming URL for a venue.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the API base scheme cannot be upgraded.
    pub fn stream_url(&self, venue: &Venue) -> Result<Url, EndpointError> {
        stream_url(&self.api_base, venue.stream_path())
    }

    /// Supervisor settings for a venue.
    ///
    /// # Errors
    ///
    /// Same as [`MuxConfig::stream_url`].
    pub fn supervisor_config(&self, venue: &Venue) -> Result<SupervisorConfig, EndpointError> {
        Ok(SupervisorConfig {
            url: self.stream_url(venue)?.to_string(),
            reconnect: self.websocket.reconnect_config(),
            heartbeat: self.websocket.heartbeat_config(),
        })
    }

    /// Store construction settings.
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_closed_bars: self.store.max_closed_bars,
            tick_channel_capacity: self.store.tick_channel_capacity,
            change_channel_capacity: self.store.change_channel_capacity,
        }
    }

    /// Startup symbols routed to `venue`.
    ///
    /// Qualified symbols go to the venue that serves their exchange; bare
    /// symbols go to the first configured venue only.
    #[must_use]
    pub fn symbols_for(&self, venue: &Venue) -> Vec<String> {
        let is_primary = self.venues.first().is_some_and(|v| v.id() == venue.id());
        self.symbols
            .iter()
            .filter(|raw| {
                if raw.contains(':') {
                    InstrumentToken::parse(raw).is_ok_and(|token| venue.serves(&token))
                } else {
                    is_primary
                }
            })
            .cloned()
            .collect()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The API base or a derived stream URL is invalid.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    /// A configured venue has no preset.
    #[error("unknown venue: {0}")]
    UnknownVenue(String),
    /// No venue is configured.
    #[error("no venues configured")]
    NoVenues,
}

fn parse_venues(raw: &str) -> Result<Vec<Venue>, ConfigError> {
    let mut venues: Vec<Venue> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let venue = Venue::preset(id).ok_or_else(|| ConfigError::UnknownVenue(id.to_string()))?;
        if !venues.iter().any(|v| v.id() == venue.id()) {
            venues.push(venue);
        }
    }
    if venues.is_empty() {
        return Err(ConfigError::NoVenues);
    }
    Ok(venues)
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Zero falls back to `default` like any other invalid value.
fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<MuxConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        MuxConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = config(&[]).unwrap();

        assert_eq!(config.api_base.as_str(), "http://localhost:8000/api");
        let ids: Vec<&str> = config.venues.iter().map(Venue::id).collect();
        assert_eq!(ids, vec!["india", "us"]);
        assert!(config.symbols.is_empty());
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.websocket, WebSocketSettings::default());
        assert_eq!(config.store.max_closed_bars, 390);
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(20));
        assert_eq!(settings.reconnect_base, Duration::from_secs(1));
        assert_eq!(settings.reconnect_cap, Duration::from_secs(30));
        assert_eq!(settings.reconnect_jitter, Duration::from_millis(500));
    }

    #[test]
    fn stream_urls_follow_api_base() {
        let config = config(&[("MARKET_API_BASE", "https://markets.example.com/api")]).unwrap();

        let india = config.supervisor_config(&Venue::india()).unwrap();
        let us = config.supervisor_config(&Venue::us()).unwrap();

        assert_eq!(india.url, "wss://markets.example.com/api/ws/quotes");
        assert_eq!(us.url, "wss://markets.example.com/api/ws/us-quotes");
    }

    #[test]
    fn numeric_overrides_and_invalid_fallbacks() {
        let config = config(&[
            ("STREAM_RECONNECT_BASE_MS", "250"),
            ("STREAM_RECONNECT_CAP_MS", "not-a-number"),
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "5"),
            ("STREAM_HEALTH_PORT", "0"),
            ("STREAM_MAX_CLOSED_BARS", "-3"),
        ])
        .unwrap();

        assert_eq!(config.websocket.reconnect_base, Duration::from_millis(250));
        assert_eq!(config.websocket.reconnect_cap, Duration::from_secs(30));
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(5));
        assert!(!config.server.health_enabled());
        assert_eq!(config.store.max_closed_bars, 390);

        let reconnect = config.websocket.reconnect_config();
        assert_eq!(reconnect.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn zero_heartbeat_falls_back_to_default() {
        let config = config(&[
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "0"),
            ("STREAM_HEARTBEAT_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        let defaults = WebSocketSettings::default();

        assert_eq!(config.websocket.heartbeat_interval, defaults.heartbeat_interval);
        assert_eq!(config.websocket.heartbeat_timeout, defaults.heartbeat_timeout);
        assert!(!config.websocket.heartbeat_config().ping_interval.is_zero());
    }

    #[test]
    fn invalid_api_base_is_an_error() {
        assert!(matches!(
            config(&[("MARKET_API_BASE", "not a url")]),
            Err(ConfigError::Endpoint(EndpointError::InvalidBase(..)))
        ));
        assert!(matches!(
            config(&[("MARKET_API_BASE", "ftp://example.com")]),
            Err(ConfigError::Endpoint(EndpointError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn venue_list_validation() {
        assert!(matches!(
            config(&[("STREAM_VENUES", "us,mars")]),
            Err(ConfigError::UnknownVenue(v)) if v == "mars"
        ));
        assert!(matches!(
            config(&[("STREAM_VENUES", " , ")]),
            Err(ConfigError::NoVenues)
        ));

        let config = config(&[("STREAM_VENUES", "US, us")]).unwrap();
        assert_eq!(config.venues.len(), 1);
        assert_eq!(config.venues[0].id(), "us");
    }

    #[test]
    fn startup_symbols_are_routed_by_exchange() {
        let config = config(&[
            ("STREAM_VENUES", "us,india"),
            ("STREAM_SYMBOLS", "aapl, NSE:RELIANCE,NYSE:IBM,,BSE:TCS"),
        ])
        .unwrap();

        assert_eq!(
            config.symbols_for(&Venue::us()),
            vec!["AAPL".to_string(), "NYSE:IBM".to_string()]
        );
        assert_eq!(
            config.symbols_for(&Venue::india()),
            vec!["NSE:RELIANCE".to_string(), "BSE:TCS".to_string()]
        );
    }

    #[test]
    fn store_config_mirrors_settings() {
        let config = config(&[("STREAM_TICK_CHANNEL_CAPACITY", "64")]).unwrap();
        let store = config.store_config();
        assert_eq!(store.tick_channel_capacity, 64);
        assert_eq!(store.change_channel_capacity, 4096);
    }
}
