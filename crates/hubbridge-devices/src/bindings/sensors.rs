/*!
 * Read-only sensors and batteries.
 */
use crate::classifier::Role;
use crate::platform::{CharacteristicProps, CharacteristicType as C, PlatformValue};

use super::Binder;

/// The characteristic and attribute behind each sensor role
fn sensor_source(role: Role) -> Option<(C, &'static str)> {
    let source = match role {
        Role::MotionSensor => (C::MotionDetected, "motion"),
        Role::PresenceSensor => (C::OccupancyDetected, "presence"),
        Role::TemperatureSensor => (C::CurrentTemperature, "temperature"),
        Role::HumiditySensor => (C::CurrentRelativeHumidity, "humidity"),
        Role::IlluminanceSensor => (C::CurrentAmbientLightLevel, "illuminance"),
        Role::ContactSensor => (C::ContactSensorState, "contact"),
        Role::WaterSensor => (C::LeakDetected, "water"),
        Role::SmokeDetector => (C::SmokeDetected, "smoke"),
        Role::CarbonMonoxide => (C::CarbonMonoxideDetected, "carbonMonoxide"),
        Role::CarbonDioxide => (C::CarbonDioxideLevel, "carbonDioxide"),
        Role::AccelerationSensor => (C::MotionDetected, "acceleration"),
        _ => return None,
    };
    Some(source)
}

pub(crate) fn bind_sensor(binder: &mut Binder<'_>) {
    let Some((characteristic, attribute)) = sensor_source(binder.role()) else {
        return;
    };
    let key = binder.primary_service();

    match binder.role() {
        Role::TemperatureSensor => binder.read_with_props(
            &key,
            characteristic,
            attribute,
            CharacteristicProps::range(-100.0, 100.0, 0.1),
        ),
        Role::IlluminanceSensor => binder.read_with_props(
            &key,
            characteristic,
            attribute,
            CharacteristicProps::range(0.0001, 100_000.0, 0.0001),
        ),
        Role::CarbonDioxide => {
            binder.read(&key, characteristic, attribute);
            binder.read(&key, C::CarbonDioxideDetected, attribute);
        }
        _ => binder.read(&key, characteristic, attribute),
    }

    if binder.device().has_attribute("tamper") {
        binder.read(&key, C::StatusTampered, "tamper");
    }
}

pub(crate) fn bind_battery(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.read_with_props(
        &key,
        C::BatteryLevel,
        "battery",
        CharacteristicProps::range(0.0, 100.0, 1.0),
    );
    binder.read(&key, C::StatusLowBattery, "battery");
    // Not chargeable
    binder.constant(&key, C::ChargingState, PlatformValue::Int(2));
}
