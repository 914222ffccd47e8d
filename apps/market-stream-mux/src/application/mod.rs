//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the streaming transport.

/// Port interfaces for the streaming transport and wire format.
pub mod ports;

/// Metric recording helpers.
pub mod metrics;

/// Reconciliation, supervision, dispatch, and the subscriber facade.
pub mod services;
