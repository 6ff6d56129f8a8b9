//! A complete configuration file goes through the builder and the logging setup.

use std::fs;

use hubbridge_core::config::{BridgeConfig, ConfigBuilder, SharedConfig, TemperatureUnit};
use hubbridge_core::logging;

const CONFIG: &str = r#"
[general]
direct_ip = "192.168.1.50"
direct_port = 8100

[logging]
level = "debug"
json_format = true

[hub]
app_url_local = "http://192.168.1.20"
app_id = "311"
access_token = "abc-123"
refresh_seconds = 900

[dispatcher]
debounce_ms = 400
batch_enabled = false

[classifier]
consider_fan_by_name = true

[classifier.excluded_capabilities]
"17" = ["Battery", "Power Meter"]

[transform]
temperature_unit = "C"
"#;

#[test]
fn test_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hubbridge.toml");
    fs::write(&path, CONFIG).unwrap();

    let config = ConfigBuilder::new().with_config_file(&path).build().unwrap();
    assert_eq!(config.general.direct_port, 8100);
    assert_eq!(config.hub.base_url(), "http://192.168.1.20/apps/api/311");
    assert_eq!(config.hub.refresh_interval().as_secs(), 900);
    assert_eq!(config.dispatcher.debounce().as_millis(), 400);
    assert!(!config.dispatcher.batch_enabled);
    // Untouched keys keep their defaults
    assert_eq!(config.dispatcher.max_attempts, 3);
    assert!(config.classifier.consider_fan_by_name);
    assert_eq!(
        config.classifier.excluded_capabilities.get("17"),
        Some(&vec!["Battery".to_string(), "Power Meter".to_string()])
    );
    assert_eq!(config.transform.temperature_unit, TemperatureUnit::Celsius);

    let parsed = BridgeConfig::from_toml_str(CONFIG).unwrap();
    assert_eq!(parsed.hub.app_id, config.hub.app_id);

    let shared = SharedConfig::from(config);
    tokio_test::assert_ok!(logging::init_from_config(&shared.get().logging));
}

#[test]
fn test_hub_url_without_app_id_is_rejected() {
    let err = BridgeConfig::from_toml_str("[hub]\napp_url_local = \"http://10.0.0.1\"\n").unwrap_err();
    assert!(err.to_string().contains("app_id"), "{}", err);
}
