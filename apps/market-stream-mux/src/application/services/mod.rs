//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `MarketStream` / `Subscriber`: Per-venue shared state and consumer facade
//! - `ConnectionSupervisor`: Transport lifecycle, reconnects, heartbeats
//! - `WireReconciler`: Ledger-to-wire diffing and batched commands
//! - `FrameDispatcher`: Inbound frame routing into the store
//! - `StreamStatus`: Per-venue health snapshot
//! - `spawn_frame_driver`: Frame-aligned flushing of a coalescer

mod dispatcher;
mod frame_driver;
mod reconciler;
mod status;
mod stream;
mod supervisor;

pub use dispatcher::{DispatchOutcome, FrameDispatcher};
pub use frame_driver::spawn_frame_driver;
pub use reconciler::{WireDelta, WireReconciler};
pub use status::{StreamStatus, StreamStatusSnapshot};
pub use stream::{MarketStream, Subscriber};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorContext};
