//! Turns controller frames into canonical status deltas.

use serde_json::{Map, Value};
use shared::protocol::{StatusDelta, TemperatureDelta, STATUS_UPDATE_METHOD};

/// Returns the delta carried by `frame`, or `None` when the frame is not a
/// status frame or carries nothing usable. Never fails.
pub fn normalize_frame(frame: &Value) -> Option<StatusDelta> {
    let status = status_object(frame)?;
    let delta = delta_from_status(status);
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

fn status_object(frame: &Value) -> Option<&Map<String, Value>> {
    let envelope = frame.as_object()?;
    if envelope.get("method").and_then(Value::as_str) == Some(STATUS_UPDATE_METHOD) {
        return envelope
            .get("params")
            .and_then(Value::as_array)
            .and_then(|params| params.first())
            .and_then(Value::as_object);
    }

    envelope
        .get("result")
        .and_then(|result| result.get("status"))
        .and_then(Value::as_object)
        .filter(|status| !status.is_empty())
}

fn delta_from_status(status: &Map<String, Value>) -> StatusDelta {
    let mut delta = StatusDelta {
        hotend: sub_object(status, "extruder").and_then(temperature_delta),
        bed: sub_object(status, "heater_bed").and_then(temperature_delta),
        ..Default::default()
    };

    if let Some(stats) = sub_object(status, "print_stats") {
        delta.filename = nullable_string(stats.get("filename"));
        delta.status = stats
            .get("state")
            .and_then(Value::as_str)
            .map(str::to_string);
        delta.print_duration = finite_number(stats.get("print_duration"));
        delta.total_duration = finite_number(stats.get("total_duration"));
    }

    let display = sub_object(status, "display_status");
    if let Some(display) = display {
        delta.message = nullable_string(display.get("message"));
    }

    // virtual_sdcard tracks file position and is the more reliable source
    delta.progress = sub_object(status, "virtual_sdcard")
        .and_then(|sdcard| progress_percent(sdcard.get("progress")))
        .or_else(|| display.and_then(|display| progress_percent(display.get("progress"))));

    delta
}

fn sub_object<'a>(status: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    status.get(key).and_then(Value::as_object)
}

fn temperature_delta(heater: &Map<String, Value>) -> Option<TemperatureDelta> {
    let delta = TemperatureDelta {
        actual: finite_number(heater.get("temperature")),
        target: finite_number(heater.get("target")),
    };
    (!delta.is_empty()).then_some(delta)
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn nullable_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Converts a 0.0..=1.0 fraction into a whole percentage.
pub fn progress_percent(value: Option<&Value>) -> Option<u8> {
    let fraction = finite_number(value)?;
    Some(fraction_to_percent(fraction))
}

pub fn fraction_to_percent(fraction: f64) -> u8 {
    // f64::round rounds half away from zero
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
