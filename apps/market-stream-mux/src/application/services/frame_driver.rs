//! Frame Driver
//!
//! Delivers the latest payload of a [`LatestCoalescer`] at most once per
//! frame period, the way a render loop would consume crosshair updates
//! from several chart panes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::coalesce::LatestCoalescer;

/// Shortest frame period the driver runs with.
pub const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Spawn a task that flushes `coalescer` into `sink` on frame boundaries.
///
/// A flush happens only when one is pending, on the first frame boundary
/// after it was scheduled. `frame_period` is raised to [`MIN_FRAME_PERIOD`].
/// The task ends on cancellation or once every receiver of `sink` is gone.
pub fn spawn_frame_driver<T>(
    coalescer: Arc<LatestCoalescer<T>>,
    frame_period: Duration,
    sink: watch::Sender<Option<T>>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut frames = tokio::time::interval(frame_period.max(MIN_FRAME_PERIOD));
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = coalescer.scheduled() => {}
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                _ = frames.tick() => {}
            }

            if let Some(value) = coalescer.take() {
                if sink.send(Some(value)).is_err() {
                    tracing::debug!("Frame driver sink closed");
                    return;
                }
            }
        }
    })
}
