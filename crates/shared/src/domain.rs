use std::fmt;

use serde::{Deserialize, Serialize};

/// One monitored printer. The address doubles as the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrinterEndpoint {
    pub name: String,
    pub address: String,
}

impl PrinterEndpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}/websocket", self.address)
    }
}

impl fmt::Display for PrinterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Resolved heater reading. `None` means the controller never reported the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub actual: Option<f64>,
    pub target: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailKey {
    pub address: String,
    pub filename: String,
}
