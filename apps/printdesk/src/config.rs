use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared::domain::PrinterEndpoint;

pub const DEFAULT_CONFIG_FILE: &str = "printdesk.toml";
pub const DEFAULT_TICK_MS: u64 = 500;
const MIN_TICK_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrinterEntry {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tick_ms: u64,
    pub printers: Vec<PrinterEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            printers: Vec::new(),
        }
    }
}

impl Settings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(MIN_TICK_MS))
    }

    /// Enabled printers in file order. Blank names fall back to `Printer N`.
    pub fn enabled_endpoints(&self) -> Vec<PrinterEndpoint> {
        self.printers
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.enabled)
            .map(|(index, entry)| {
                let name = entry.name.trim();
                let name = if name.is_empty() {
                    format!("Printer {}", index + 1)
                } else {
                    name.to_string()
                };
                PrinterEndpoint::new(name, entry.address.trim())
            })
            .collect()
    }
}

/// Reads `path`, or `printdesk.toml` in the working directory when no path is
/// given. Only an explicitly named file is required to exist.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let mut settings = if path.exists() || required {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        parse_settings(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?
    } else {
        Settings::default()
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub fn parse_settings(raw: &str) -> Result<Settings> {
    Ok(toml::from_str(raw)?)
}

/// `PRINTDESK__TICK_MS` replaces the tick, `PRINTDESK__PRINTERS`
/// (`name=addr,name=addr`) replaces the printer list.
pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("PRINTDESK__TICK_MS") {
        settings.tick_ms = v
            .trim()
            .parse()
            .with_context(|| format!("PRINTDESK__TICK_MS is not a number: '{v}'"))?;
    }
    if let Some(v) = lookup("PRINTDESK__PRINTERS") {
        settings.printers = v
            .split(',')
            .filter(|item| !item.trim().is_empty())
            .map(parse_printer_arg)
            .collect::<Result<_>>()
            .context("invalid PRINTDESK__PRINTERS")?;
    }
    Ok(())
}

/// Parses `name=address` or a bare `address`.
pub fn parse_printer_arg(raw: &str) -> Result<PrinterEntry> {
    let raw = raw.trim();
    let (name, address) = match raw.split_once('=') {
        Some((name, address)) => (name.trim(), address.trim()),
        None => (raw, raw),
    };
    if address.is_empty() {
        bail!("printer '{raw}' has no address");
    }
    Ok(PrinterEntry {
        name: name.to_string(),
        address: address.to_string(),
        enabled: true,
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
