//! Mirrors the live status of Moonraker-controlled printers into per-printer
//! state stores.
//!
//! Each printer gets a [`supervisor`] task that keeps a status subscription
//! open and forwards raw frames onto one shared channel. A single
//! [`reconciler`] task drains that channel on a fixed tick, folds the frames
//! through the [`normalizer`] into per-printer [`store`]s and hands snapshots
//! to the presentation side over a `crossbeam_channel`. [`session`] wires the
//! tasks together and owns their lifecycle.

use tokio::sync::watch;

pub mod normalizer;
pub mod reconciler;
pub mod session;
pub mod smoother;
pub mod store;
pub mod supervisor;

pub use normalizer::normalize_frame;
pub use reconciler::{PrinterUpdate, Reconciler, TickReport, DEFAULT_TICK};
pub use session::{
    validate_endpoints, MonitorSession, SessionError, SessionLifecycle, SessionOptions,
    DEFAULT_JOIN_TIMEOUT,
};
pub use store::{PrinterSnapshot, PrinterStore};
pub use supervisor::{
    spawn_supervisor, Backoff, StopOutcome, SupervisorConfig, SupervisorHandle,
};

/// Resolves once `stop` turns true or its sender is dropped.
pub(crate) async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
