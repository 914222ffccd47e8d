//! Domain Layer - Core streaming types and business logic.
//!
//! Pure types with no I/O: instrument tokens, the subscription ledger,
//! stream records, the connection state machine, and the latest-value
//! coalescer.

/// Instrument tokens, venues, and normalization.
pub mod token;

/// Reference-counted subscription ledger.
pub mod subscription;

/// Tick, bar, and connection state records.
pub mod streaming;

/// Connection lifecycle state machine and reconnect backoff.
pub mod connection;

/// Pending-flag plus latest-payload coalescing.
pub mod coalesce;
