use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn parses_file_with_disabled_and_unnamed_printers() {
    let settings = parse_settings(
        r#"
        tick_ms = 250

        [[printers]]
        name = "Voron"
        address = "192.168.1.50"

        [[printers]]
        ip = "192.168.1.51:7125"

        [[printers]]
        name = "Spare"
        address = "192.168.1.52"
        enabled = false
        "#,
    )
    .expect("parse");

    assert_eq!(settings.tick(), Duration::from_millis(250));
    assert_eq!(
        settings.enabled_endpoints(),
        vec![
            PrinterEndpoint::new("Voron", "192.168.1.50"),
            PrinterEndpoint::new("Printer 2", "192.168.1.51:7125"),
        ]
    );
}

#[test]
fn empty_file_uses_defaults() {
    let settings = parse_settings("").expect("parse");
    assert_eq!(settings, Settings::default());
    assert!(settings.enabled_endpoints().is_empty());
}

#[test]
fn tick_has_a_floor() {
    let settings = Settings {
        tick_ms: 1,
        ..Settings::default()
    };
    assert_eq!(settings.tick(), Duration::from_millis(50));
}

#[test]
fn env_overrides_replace_tick_and_printers() {
    let mut settings = parse_settings(
        r#"
        [[printers]]
        name = "Old"
        address = "10.0.0.1"
        "#,
    )
    .expect("parse");

    apply_env_overrides(
        &mut settings,
        env_of(&[
            ("PRINTDESK__TICK_MS", "1000"),
            ("PRINTDESK__PRINTERS", "ender=10.0.0.2, voron=10.0.0.3:7125,"),
        ]),
    )
    .expect("overrides");

    assert_eq!(settings.tick_ms, 1000);
    assert_eq!(
        settings.enabled_endpoints(),
        vec![
            PrinterEndpoint::new("ender", "10.0.0.2"),
            PrinterEndpoint::new("voron", "10.0.0.3:7125"),
        ]
    );
}

#[test]
fn bad_env_values_are_reported() {
    let mut settings = Settings::default();
    assert!(apply_env_overrides(&mut settings, env_of(&[("PRINTDESK__TICK_MS", "soon")])).is_err());
    assert!(
        apply_env_overrides(&mut settings, env_of(&[("PRINTDESK__PRINTERS", "ender=")])).is_err()
    );
}

#[test]
fn printer_arg_accepts_bare_address() {
    assert_eq!(
        parse_printer_arg("10.0.0.9").expect("parse"),
        PrinterEntry {
            name: "10.0.0.9".into(),
            address: "10.0.0.9".into(),
            enabled: true,
        }
    );
    assert_eq!(
        parse_printer_arg(" bench = 10.0.0.9:7125 ")
            .expect("parse")
            .address,
        "10.0.0.9:7125"
    );
}

#[test]
fn explicit_config_path_must_exist() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let missing = env::temp_dir().join(format!("printdesk_missing_{suffix}.toml"));
    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn loads_explicit_config_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("printdesk_test_{suffix}.toml"));
    fs::write(
        &path,
        "[[printers]]\nname = \"Ender\"\naddress = \"10.0.0.7\"\n",
    )
    .expect("write config");

    let settings = load_settings(Some(&path)).expect("load");
    fs::remove_file(&path).expect("cleanup");

    assert!(settings
        .printers
        .iter()
        .any(|p| p.name == "Ender" && p.address == "10.0.0.7"));
}
