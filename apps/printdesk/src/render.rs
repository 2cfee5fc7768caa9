use monitor_core::PrinterSnapshot;
use shared::domain::TemperatureReading;

const MISSING: &str = "—";

pub fn temperature(label: &str, reading: TemperatureReading) -> String {
    let Some(actual) = reading.actual else {
        return format!("{label}: {MISSING}");
    };
    match reading.target {
        Some(target) => format!("{label}: {actual:.1}°C / {target:.0}°C"),
        None => format!("{label}: {actual:.1}°C"),
    }
}

/// `3725.0` -> `1h 02m`, `95.0` -> `1m 35s`.
pub fn duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return MISSING.to_string();
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {secs:02}s")
    }
}

pub fn status_line(snapshot: &PrinterSnapshot) -> String {
    let mut line = format!(
        "{} [{}] {:>3}% | {} | {} | Status: {}",
        snapshot.name,
        snapshot.address,
        snapshot.progress,
        temperature("Hotend", snapshot.hotend),
        temperature("Bed", snapshot.bed),
        snapshot.status,
    );
    if !snapshot.filename.is_empty() {
        line.push_str(&format!(
            " | {} ({})",
            snapshot.filename,
            duration(snapshot.print_duration)
        ));
    }
    if !snapshot.message.is_empty() {
        line.push_str(&format!(" | {}", snapshot.message));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::PrinterStore;
    use shared::{domain::PrinterEndpoint, protocol::StatusDelta};

    #[test]
    fn missing_readings_render_as_dash() {
        assert_eq!(temperature("Hotend", TemperatureReading::default()), "Hotend: —");
        assert_eq!(
            temperature(
                "Bed",
                TemperatureReading {
                    actual: Some(59.84),
                    target: None
                }
            ),
            "Bed: 59.8°C"
        );
        assert_eq!(
            temperature(
                "Hotend",
                TemperatureReading {
                    actual: Some(205.34),
                    target: Some(210.0)
                }
            ),
            "Hotend: 205.3°C / 210°C"
        );
    }

    #[test]
    fn durations() {
        assert_eq!(duration(0.0), "—");
        assert_eq!(duration(95.0), "1m 35s");
        assert_eq!(duration(3725.0), "1h 02m");
    }

    #[test]
    fn idle_printer_line() {
        let store = PrinterStore::new(PrinterEndpoint::new("Ender", "10.0.0.5"));
        assert_eq!(
            status_line(&store.snapshot()),
            "Ender [10.0.0.5]   0% | Hotend: — | Bed: — | Status: idle"
        );
    }

    #[test]
    fn printing_line_includes_file_and_message() {
        let mut store = PrinterStore::new(PrinterEndpoint::new("Voron", "10.0.0.6"));
        store.apply_delta(StatusDelta {
            progress: Some(42),
            filename: Some("benchy.gcode".into()),
            status: Some("printing".into()),
            message: Some("Layer 12/80".into()),
            print_duration: Some(125.0),
            ..Default::default()
        });
        assert_eq!(
            status_line(&store.snapshot()),
            "Voron [10.0.0.6]  42% | Hotend: — | Bed: — | Status: printing | benchy.gcode (2m 05s) | Layer 12/80"
        );
    }
}
