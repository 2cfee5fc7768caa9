//! Single consumer of inbound frames and sole owner of every printer store.

use std::{
    collections::{hash_map::Entry, BTreeSet, HashMap},
    time::Duration,
};

use crossbeam_channel::Sender;
use shared::{
    domain::{PrinterEndpoint, ThumbnailKey},
    protocol::{RawFrame, StatusDelta},
};
use tokio::{
    sync::{
        mpsc::{self, error::TryRecvError},
        watch,
    },
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};

use crate::{
    normalizer::normalize_frame,
    store::{PrinterSnapshot, PrinterStore},
    wait_for_stop,
};

pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Notification handed to the presentation side for one printer.
#[derive(Debug, Clone)]
pub struct PrinterUpdate {
    pub snapshot: PrinterSnapshot,
    /// Set once per new filename; a thumbnail fetch is owed for it.
    pub thumbnail: Option<ThumbnailKey>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frames: usize,
    pub discarded: usize,
    pub changed: usize,
    pub notified: usize,
}

pub struct Reconciler {
    stores: HashMap<String, PrinterStore>,
    inbound: mpsc::UnboundedReceiver<RawFrame>,
    updates: Sender<PrinterUpdate>,
    updates_paused: watch::Receiver<bool>,
    dirty: BTreeSet<String>,
    inbound_closed: bool,
    presentation_gone: bool,
}

impl Reconciler {
    pub fn new(
        endpoints: &[PrinterEndpoint],
        inbound: mpsc::UnboundedReceiver<RawFrame>,
        updates: Sender<PrinterUpdate>,
        updates_paused: watch::Receiver<bool>,
    ) -> Self {
        let stores = endpoints
            .iter()
            .map(|endpoint| (endpoint.address.clone(), PrinterStore::new(endpoint.clone())))
            .collect();
        Self {
            stores,
            inbound,
            updates,
            updates_paused,
            dirty: BTreeSet::new(),
            inbound_closed: false,
            presentation_gone: false,
        }
    }

    pub fn snapshot(&self, address: &str) -> Option<PrinterSnapshot> {
        self.stores.get(address).map(PrinterStore::snapshot)
    }

    pub fn snapshots(&self) -> Vec<PrinterSnapshot> {
        let mut snapshots: Vec<_> = self.stores.values().map(PrinterStore::snapshot).collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    pub fn inbound_closed(&self) -> bool {
        self.inbound_closed
    }

    /// Drains the frames queued when the tick starts, applies one coalesced
    /// delta per printer and notifies once per printer whose state changed.
    /// Frames arriving during the tick are left for the next one.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut pending: HashMap<String, StatusDelta> = HashMap::new();

        let budget = self.inbound.len();
        for _ in 0..budget {
            let frame = match self.inbound.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.inbound_closed = true;
                    break;
                }
            };
            report.frames += 1;

            if !self.stores.contains_key(&frame.endpoint_address) {
                report.discarded += 1;
                debug!(address = %frame.endpoint_address, "frame for unknown printer");
                continue;
            }
            let Some(delta) = normalize_frame(&frame.payload) else {
                report.discarded += 1;
                trace!(address = %frame.endpoint_address, "frame carried no status");
                continue;
            };
            match pending.entry(frame.endpoint_address) {
                Entry::Occupied(mut entry) => entry.get_mut().coalesce(delta),
                Entry::Vacant(entry) => {
                    entry.insert(delta);
                }
            }
        }
        if self.inbound.is_empty() && self.inbound.is_closed() {
            self.inbound_closed = true;
        }

        for (address, delta) in pending {
            let Some(store) = self.stores.get_mut(&address) else {
                continue;
            };
            if store.apply_delta(delta) {
                report.changed += 1;
                self.dirty.insert(address);
            }
        }

        if !*self.updates_paused.borrow() {
            report.notified = self.flush_updates();
        }
        report
    }

    /// Marks every printer for notification, changed or not. Sent right away
    /// unless updates are paused.
    pub fn announce_all(&mut self) -> usize {
        self.dirty.extend(self.stores.keys().cloned());
        if *self.updates_paused.borrow() {
            return 0;
        }
        self.flush_updates()
    }

    fn flush_updates(&mut self) -> usize {
        let mut notified = 0;
        for address in std::mem::take(&mut self.dirty) {
            let Some(store) = self.stores.get_mut(&address) else {
                continue;
            };
            let update = PrinterUpdate {
                thumbnail: store.take_thumbnail_request(),
                snapshot: store.snapshot(),
            };
            if self.updates.send(update).is_ok() {
                notified += 1;
            } else if !self.presentation_gone {
                self.presentation_gone = true;
                warn!("presentation receiver disconnected; state is still maintained");
            }
        }
        notified
    }

    /// Ticks every `interval` until `shutdown` fires or all producers are gone,
    /// then runs a final pass over whatever is still queued.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.announce_all();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick();
                    if report.frames > 0 {
                        trace!(
                            frames = report.frames,
                            discarded = report.discarded,
                            changed = report.changed,
                            notified = report.notified,
                            "reconciler tick"
                        );
                    }
                    if self.inbound_closed {
                        debug!("all printer connections finished");
                        break;
                    }
                }
                _ = wait_for_stop(&mut shutdown) => break,
            }
        }

        let report = self.tick();
        info!(
            printers = self.stores.len(),
            final_frames = report.frames,
            "reconciler stopped"
        );
        self
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
