//! Configuration Module
//!
//! Environment-driven configuration for the multiplexer daemon.

mod settings;

pub use settings::{ConfigError, MuxConfig, ServerSettings, StoreSettings, WebSocketSettings};
