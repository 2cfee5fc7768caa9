use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{PrinterEndpoint, TemperatureReading, ThumbnailKey},
    protocol::{StatusDelta, TemperatureDelta},
};

use crate::smoother::{record_progress, smooth_progress};

pub const DEFAULT_STATUS: &str = "idle";

/// Immutable copy of a printer's state, safe to hand to another thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterSnapshot {
    pub name: String,
    pub address: String,
    pub progress: u8,
    pub filename: String,
    pub hotend: TemperatureReading,
    pub bed: TemperatureReading,
    pub status: String,
    pub message: String,
    pub print_duration: f64,
    pub total_duration: f64,
    pub progress_history: Vec<u8>,
    pub last_update: DateTime<Utc>,
}

/// Current state of one printer. Lives on the reconciler task only.
#[derive(Debug)]
pub struct PrinterStore {
    endpoint: PrinterEndpoint,
    progress: u8,
    filename: String,
    hotend: TemperatureReading,
    bed: TemperatureReading,
    status: String,
    message: String,
    print_duration: f64,
    total_duration: f64,
    progress_history: VecDeque<u8>,
    last_update: DateTime<Utc>,
    last_thumbnail_filename: String,
}

impl PrinterStore {
    pub fn new(endpoint: PrinterEndpoint) -> Self {
        Self {
            endpoint,
            progress: 0,
            filename: String::new(),
            hotend: TemperatureReading::default(),
            bed: TemperatureReading::default(),
            status: DEFAULT_STATUS.to_string(),
            message: String::new(),
            print_duration: 0.0,
            total_duration: 0.0,
            progress_history: VecDeque::new(),
            last_update: Utc::now(),
            last_thumbnail_filename: String::new(),
        }
    }

    pub fn endpoint(&self) -> &PrinterEndpoint {
        &self.endpoint
    }

    /// Applies every present field of `delta`; returns whether any visible value changed.
    pub fn apply_delta(&mut self, delta: StatusDelta) -> bool {
        let mut changed = false;

        if let Some(raw) = delta.progress {
            let accepted = smooth_progress(&self.progress_history, raw).min(100);
            record_progress(&mut self.progress_history, accepted);
            changed |= replace(&mut self.progress, accepted);
        }
        if let Some(filename) = delta.filename {
            changed |= replace(&mut self.filename, filename);
        }
        if let Some(hotend) = delta.hotend {
            changed |= apply_temperature(&mut self.hotend, hotend);
        }
        if let Some(bed) = delta.bed {
            changed |= apply_temperature(&mut self.bed, bed);
        }
        if let Some(status) = delta.status {
            changed |= replace(&mut self.status, status);
        }
        if let Some(message) = delta.message {
            changed |= replace(&mut self.message, message);
        }
        if let Some(print_duration) = delta.print_duration {
            changed |= replace(&mut self.print_duration, print_duration);
        }
        if let Some(total_duration) = delta.total_duration {
            changed |= replace(&mut self.total_duration, total_duration);
        }

        if changed {
            self.last_update = Utc::now();
        }
        changed
    }

    pub fn snapshot(&self) -> PrinterSnapshot {
        PrinterSnapshot {
            name: self.endpoint.name.clone(),
            address: self.endpoint.address.clone(),
            progress: self.progress,
            filename: self.filename.clone(),
            hotend: self.hotend,
            bed: self.bed,
            status: self.status.clone(),
            message: self.message.clone(),
            print_duration: self.print_duration,
            total_duration: self.total_duration,
            progress_history: self.progress_history.iter().copied().collect(),
            last_update: self.last_update,
        }
    }

    /// Returns a thumbnail key once per new non-empty filename.
    pub fn take_thumbnail_request(&mut self) -> Option<ThumbnailKey> {
        if self.filename.is_empty() || self.filename == self.last_thumbnail_filename {
            return None;
        }
        self.last_thumbnail_filename = self.filename.clone();
        Some(ThumbnailKey {
            address: self.endpoint.address.clone(),
            filename: self.filename.clone(),
        })
    }

    pub fn last_thumbnail_filename(&self) -> &str {
        &self.last_thumbnail_filename
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn apply_temperature(reading: &mut TemperatureReading, delta: TemperatureDelta) -> bool {
    let mut changed = false;
    if let Some(actual) = delta.actual {
        changed |= replace(&mut reading.actual, Some(actual));
    }
    if let Some(target) = delta.target {
        changed |= replace(&mut reading.target, Some(target));
    }
    changed
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
