//! A device list goes through parsing, classification, binding and the registry.

use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;

use hubbridge_core::types::Value;
use hubbridge_devices::platform::{
    read_characteristic, write_characteristic, CharacteristicType, PlatformValue, ServiceKey,
    ServiceType,
};
use hubbridge_devices::{
    bind_device, classify, AccessoryHost, BindContext, ClassifierConfig, CommandRequest,
    CommandSink, DeviceDescriptor, DeviceEntry, DeviceRegistry, MemoryHost, Role,
    TransformOptions,
};

#[derive(Default)]
struct Recorder(Mutex<Vec<CommandRequest>>);

impl CommandSink for Recorder {
    fn submit(&self, request: CommandRequest) {
        self.0.lock().unwrap().push(request);
    }
}

fn device_list() -> Vec<serde_json::Value> {
    vec![
        json!({
            "deviceid": 42,
            "name": "Kitchen Light",
            "capabilities": ["Switch", "Switch Level", "LightBulb"],
            "attributes": {"switch": "on", "level": "55"},
            "commands": ["on", "off", "setLevel"]
        }),
        json!({
            "deviceid": "hsm",
            "name": "Alarm",
            "capabilities": {"AlarmSystemStatus": null},
            "attributes": {"alarmSystemStatus": "armedNight"},
            "commands": {"setAlarmSystemStatus": ["string"]}
        }),
        json!({"name": "no id"}),
    ]
}

#[test]
fn test_refresh_and_control_devices() {
    let (devices, errors) = DeviceDescriptor::parse_list(&device_list());
    assert_eq!(devices.len(), 2);
    assert_eq!(errors.len(), 1);

    let registry = DeviceRegistry::new();
    let host = MemoryHost::new();
    let sink = Arc::new(Recorder::default());
    let options = Arc::new(RwLock::new(TransformOptions::default()));
    let config = ClassifierConfig::default();

    let diff = registry.diff(devices).unwrap();
    assert_eq!(diff.to_add.len(), 2);
    for device in diff.to_add {
        let id = device.id.clone();
        let classification = classify(&device, &config);
        let accessory = host.create_accessory(&id, &device.label);
        let shared = device.into_shared();
        let ctx = BindContext {
            device: shared.clone(),
            services: accessory.clone(),
            sink: sink.clone(),
            options: options.clone(),
        };
        let bindings = bind_device(&ctx, &classification);
        let mut entry = DeviceEntry::new(shared, accessory);
        entry.set_bindings(classification, bindings);
        registry.add(entry).unwrap();
    }
    assert_eq!(registry.ids().unwrap(), vec!["42".to_string(), "hsm".to_string()]);
    assert_eq!(
        registry.with_entry("42", |e| e.roles()).unwrap(),
        vec![Role::Light]
    );

    let light = registry.accessory("42").unwrap();
    let bulb = ServiceKey::primary(ServiceType::Lightbulb);
    assert_eq!(
        read_characteristic(&light, &bulb, CharacteristicType::Brightness),
        Some(PlatformValue::Int(55))
    );
    write_characteristic(&light, &bulb, CharacteristicType::On, PlatformValue::Bool(false));

    let alarm = registry.accessory("hsm").unwrap();
    let panel = ServiceKey::primary(ServiceType::SecuritySystem);
    write_characteristic(
        &alarm,
        &panel,
        CharacteristicType::SecuritySystemTargetState,
        PlatformValue::Int(2),
    );
    assert_eq!(
        *sink.0.lock().unwrap(),
        vec![
            CommandRequest::new("42", "off"),
            CommandRequest::new("hsm", "setAlarmSystemStatus").with_param("armNight"),
        ]
    );

    // The alarm disappears from the next refresh, the light changes state
    let next = DeviceDescriptor::new("42", "Kitchen Light")
        .with_capability("Switch")
        .with_capability("Switch Level")
        .with_capability("LightBulb")
        .with_attribute("switch", "on")
        .with_attribute("level", 80);
    let diff = registry.diff(vec![next]).unwrap();
    assert_eq!(diff.to_remove, vec!["hsm".to_string()]);
    for id in &diff.to_remove {
        registry.remove(id).unwrap();
        host.remove_accessory(id);
    }
    for device in diff.to_update {
        registry.update(device).unwrap();
    }

    assert_eq!(host.accessory_ids(), vec!["42".to_string()]);
    assert_eq!(
        registry.device("42").unwrap().read().unwrap().attribute("level"),
        Some(&Value::from(80))
    );
    assert_eq!(
        read_characteristic(&light, &bulb, CharacteristicType::Brightness),
        Some(PlatformValue::Int(80))
    );
}
