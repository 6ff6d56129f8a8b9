/*!
 * Thermostats, air purifiers and filters.
 *
 * The platform models a thermostat with a single target temperature while
 * hubs usually report separate heating and cooling setpoints. The target
 * stands for the setpoint of the active mode; in `auto` it is whichever
 * setpoint is closer to the current temperature.
 */
use std::sync::{Arc, PoisonError};

use tracing::debug;

use hubbridge_core::config::TemperatureUnit;
use hubbridge_core::types::Value;

use crate::device::DeviceDescriptor;
use crate::platform::consts::{display_units, heating_cooling};
use crate::platform::{
    CharacteristicProps, CharacteristicSpec, CharacteristicType as C, GetHandler, PlatformValue,
    SetHandler,
};
use crate::transform;

use super::{Binder, CommandRequest};

const TARGET_WATCHED: [&str; 5] = [
    "thermostatMode",
    "heatingSetpoint",
    "coolingSetpoint",
    "thermostatSetpoint",
    "temperature",
];

/// Air purifier current states
const PURIFIER_INACTIVE: i64 = 0;
const PURIFIER_PURIFYING: i64 = 2;

fn number(device: &DeviceDescriptor, attribute: &str) -> Option<f64> {
    device.attribute(attribute).and_then(Value::to_number)
}

/// The setpoint attribute the single target temperature stands for
pub(crate) fn target_setpoint(device: &DeviceDescriptor) -> Option<&'static str> {
    let mode = device
        .attribute("thermostatMode")
        .and_then(Value::to_text)
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let heat = number(device, "heatingSetpoint");
    let cool = number(device, "coolingSetpoint");

    match mode.as_str() {
        "heat" | "emergency heat" if heat.is_some() => Some("heatingSetpoint"),
        "cool" if cool.is_some() => Some("coolingSetpoint"),
        "auto" => match (heat, cool, number(device, "temperature")) {
            (Some(h), Some(c), Some(t)) => {
                if (t - h).abs() <= (t - c).abs() {
                    Some("heatingSetpoint")
                } else {
                    Some("coolingSetpoint")
                }
            }
            _ => fallback_setpoint(device),
        },
        _ => fallback_setpoint(device),
    }
}

fn fallback_setpoint(device: &DeviceDescriptor) -> Option<&'static str> {
    ["thermostatSetpoint", "heatingSetpoint", "coolingSetpoint"]
        .into_iter()
        .find(|a| number(device, a).is_some())
}

fn target_reader(binder: &Binder<'_>) -> GetHandler {
    let device = binder.ctx().device.clone();
    let options = binder.ctx().options.clone();
    Arc::new(move || {
        let opts = *options.read().unwrap_or_else(PoisonError::into_inner);
        let device = device.read().unwrap_or_else(PoisonError::into_inner);
        let attribute = target_setpoint(&device)?;
        transform::to_platform_value(
            attribute,
            device.attribute(attribute)?,
            Some(C::TargetTemperature),
            &opts,
        )
    })
}

fn target_writer(binder: &Binder<'_>) -> SetHandler {
    let device = binder.ctx().device.clone();
    let options = binder.ctx().options.clone();
    let sink = binder.ctx().sink.clone();
    let device_id = binder.device().id.clone();
    Arc::new(move |value: PlatformValue| {
        let opts = *options.read().unwrap_or_else(PoisonError::into_inner);
        let attribute = {
            let device = device.read().unwrap_or_else(PoisonError::into_inner);
            target_setpoint(&device).unwrap_or("heatingSetpoint")
        };
        match transform::to_hub_command(attribute, &value, &opts) {
            Some(command) => sink.submit(CommandRequest::from_hub_command(&device_id, command)),
            None => debug!("Ignoring target temperature {} for {}", value, device_id),
        }
    })
}

pub(crate) fn bind_thermostat(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let device = binder.device().clone();

    binder.read_with_props(
        &key,
        C::CurrentTemperature,
        "temperature",
        CharacteristicProps::range(-100.0, 100.0, 0.1),
    );
    binder.read_with_props(
        &key,
        C::CurrentHeatingCoolingState,
        "thermostatOperatingState",
        CharacteristicProps::valid_values(vec![
            heating_cooling::OFF,
            heating_cooling::HEAT,
            heating_cooling::COOL,
        ]),
    );
    binder.write(
        &key,
        C::TargetHeatingCoolingState,
        "thermostatMode",
        Some(CharacteristicProps::valid_values(vec![
            heating_cooling::OFF,
            heating_cooling::HEAT,
            heating_cooling::COOL,
            heating_cooling::AUTO,
        ])),
    );

    let options = binder.ctx().options.clone();
    let units: GetHandler = Arc::new(move || {
        let opts = options.read().unwrap_or_else(PoisonError::into_inner);
        Some(PlatformValue::Int(match opts.temperature_unit {
            TemperatureUnit::Celsius => display_units::CELSIUS,
            TemperatureUnit::Fahrenheit => display_units::FAHRENHEIT,
        }))
    });
    binder.characteristic(
        &key,
        CharacteristicSpec::new(C::TemperatureDisplayUnits).on_get(units),
        &[],
    );

    let target = CharacteristicSpec::new(C::TargetTemperature)
        .props(CharacteristicProps::range(10.0, 38.0, 0.5))
        .on_get(target_reader(binder))
        .on_set(target_writer(binder));
    binder.characteristic(&key, target, &TARGET_WATCHED);

    if device.has_attribute("heatingSetpoint") && device.has_attribute("coolingSetpoint") {
        binder.write(
            &key,
            C::HeatingThresholdTemperature,
            "heatingSetpoint",
            Some(CharacteristicProps::range(0.0, 25.0, 0.5)),
        );
        binder.write(
            &key,
            C::CoolingThresholdTemperature,
            "coolingSetpoint",
            Some(CharacteristicProps::range(10.0, 35.0, 0.5)),
        );
    }
    if device.has_attribute("humidity") {
        binder.read(&key, C::CurrentRelativeHumidity, "humidity");
    }
}

pub(crate) fn bind_air_purifier(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let device = binder.device().clone();

    binder.write(&key, C::Active, "switch", None);

    let state = binder.ctx().device.clone();
    let current: GetHandler = Arc::new(move || {
        let device = state.read().unwrap_or_else(PoisonError::into_inner);
        let on = device.attribute("switch")?.text_eq("on");
        Some(PlatformValue::Int(if on {
            PURIFIER_PURIFYING
        } else {
            PURIFIER_INACTIVE
        }))
    });
    binder.characteristic(
        &key,
        CharacteristicSpec::new(C::CurrentAirPurifierState).on_get(current),
        &["switch"],
    );

    if device.has_attribute("fanMode") {
        binder.write(&key, C::TargetAirPurifierState, "fanMode", None);
    }
    if device.has_attribute("tamper") {
        binder.read(&key, C::StatusTampered, "tamper");
    }
}

pub(crate) fn bind_filter_maintenance(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.read(&key, C::FilterChangeIndication, "filterStatus");
}
