use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SUBSCRIBE_METHOD: &str = "printer.objects.subscribe";
pub const STATUS_UPDATE_METHOD: &str = "notify_status_update";
pub const SUBSCRIBE_REQUEST_ID: u64 = 42;

/// Object/field pairs requested from the controller on every (re)connect.
pub const SUBSCRIBED_OBJECTS: &[(&str, &[&str])] = &[
    ("extruder", &["temperature", "target"]),
    ("heater_bed", &["temperature", "target"]),
    (
        "print_stats",
        &["state", "filename", "print_duration", "total_duration"],
    ),
    ("display_status", &["progress", "message"]),
    ("virtual_sdcard", &["progress", "file_position", "file_size"]),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn subscribe() -> Self {
        let objects: serde_json::Map<String, Value> = SUBSCRIBED_OBJECTS
            .iter()
            .map(|(object, fields)| ((*object).to_string(), json!(fields)))
            .collect();
        Self {
            jsonrpc: "2.0".to_string(),
            method: SUBSCRIBE_METHOD.to_string(),
            params: json!({ "objects": objects }),
            id: SUBSCRIBE_REQUEST_ID,
        }
    }
}

/// One decoded frame as received by a connection supervisor.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub endpoint_address: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(endpoint_address: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint_address: endpoint_address.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl TemperatureDelta {
    pub fn is_empty(&self) -> bool {
        self.actual.is_none() && self.target.is_none()
    }

    pub fn merge(&mut self, later: TemperatureDelta) {
        if later.actual.is_some() {
            self.actual = later.actual;
        }
        if later.target.is_some() {
            self.target = later.target;
        }
    }
}

/// Canonical partial status. Absent fields mean "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotend: Option<TemperatureDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed: Option<TemperatureDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
}

impl StatusDelta {
    pub fn is_empty(&self) -> bool {
        self.progress.is_none()
            && self.filename.is_none()
            && self.hotend.is_none()
            && self.bed.is_none()
            && self.status.is_none()
            && self.message.is_none()
            && self.print_duration.is_none()
            && self.total_duration.is_none()
    }

    /// Folds a later delta into this one, last write wins per field.
    pub fn coalesce(&mut self, later: StatusDelta) {
        if later.progress.is_some() {
            self.progress = later.progress;
        }
        if later.filename.is_some() {
            self.filename = later.filename;
        }
        merge_temperature(&mut self.hotend, later.hotend);
        merge_temperature(&mut self.bed, later.bed);
        if later.status.is_some() {
            self.status = later.status;
        }
        if later.message.is_some() {
            self.message = later.message;
        }
        if later.print_duration.is_some() {
            self.print_duration = later.print_duration;
        }
        if later.total_duration.is_some() {
            self.total_duration = later.total_duration;
        }
    }
}

fn merge_temperature(current: &mut Option<TemperatureDelta>, later: Option<TemperatureDelta>) {
    match (current.as_mut(), later) {
        (Some(existing), Some(later)) => existing.merge(later),
        (None, Some(later)) => *current = Some(later),
        (_, None) => {}
    }
}
