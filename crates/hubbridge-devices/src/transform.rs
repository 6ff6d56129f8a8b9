/*!
 * Attribute value transforms.
 *
 * Pure mappings between hub attribute values and platform characteristic
 * values in both directions. `None` means "no change": the caller keeps the
 * previous value (inbound) or sends nothing (outbound).
 */
use hubbridge_core::config::{TemperatureUnit, TransformSettings};
use hubbridge_core::types::Value;

use crate::platform::consts::{
    door, fan_mode, heating_cooling, lock, position, security,
};
use crate::platform::{CharacteristicType, PlatformValue};

/// Options that change how values are mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Snap levels below 5 to 0 and above 95 to 100
    pub round_levels: bool,
    /// Temperature unit used by the hub
    pub temperature_unit: TemperatureUnit,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            round_levels: true,
            temperature_unit: TemperatureUnit::Fahrenheit,
        }
    }
}

impl From<&TransformSettings> for TransformOptions {
    fn from(settings: &TransformSettings) -> Self {
        Self {
            round_levels: settings.round_levels,
            temperature_unit: settings.temperature_unit,
        }
    }
}

/// A command to send to the hub
#[derive(Debug, Clone, PartialEq)]
pub struct HubCommand {
    /// Command name
    pub command: String,
    /// Single argument, if the command takes one
    pub value: Option<Value>,
}

impl HubCommand {
    fn bare(command: &str) -> Self {
        Self {
            command: command.to_string(),
            value: None,
        }
    }

    fn with_value(command: &str, value: impl Into<Value>) -> Self {
        Self {
            command: command.to_string(),
            value: Some(value.into()),
        }
    }
}

/// Fan speed names and their percentage
const SPEEDS: &[(&str, i64)] = &[
    ("off", 0),
    ("low", 20),
    ("medium-low", 40),
    ("medium", 60),
    ("medium-high", 80),
    ("high", 100),
    ("on", 100),
    ("auto", 100),
];

/// Carbon dioxide level reported as "detected"
const CO2_DETECTED_PPM: f64 = 2000.0;

/// Battery level reported as low
const LOW_BATTERY: i64 = 20;

fn text(raw: &Value) -> String {
    raw.to_text()
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

fn flag(raw: &Value, expected: &str) -> PlatformValue {
    PlatformValue::Int(i64::from(raw.text_eq(expected)))
}

fn clamp_percent(n: f64) -> i64 {
    n.round().clamp(0.0, 100.0) as i64
}

/// Round to the nearest `1 / denominator`
fn round_to(n: f64, denominator: f64) -> f64 {
    (n * denominator).round() / denominator
}

fn level(n: f64, opts: &TransformOptions) -> i64 {
    let level = clamp_percent(n);
    if opts.round_levels {
        if level < 5 {
            return 0;
        }
        if level > 95 {
            return 100;
        }
    }
    level
}

/// Convert a hub temperature to Celsius with one decimal
pub fn to_celsius(n: f64, unit: TemperatureUnit) -> f64 {
    let celsius = match unit {
        TemperatureUnit::Fahrenheit => (n - 32.0) * 5.0 / 9.0,
        TemperatureUnit::Celsius => n,
    };
    round_to(celsius, 10.0)
}

/// Convert a Celsius temperature to the hub's unit
///
/// Fahrenheit values are whole degrees, Celsius values half degrees.
pub fn from_celsius(celsius: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Fahrenheit => (celsius * 9.0 / 5.0 + 32.0).round(),
        TemperatureUnit::Celsius => round_to(celsius, 2.0),
    }
}

fn pass_through(raw: &Value) -> Option<PlatformValue> {
    match raw {
        Value::Bool(b) => Some(PlatformValue::Bool(*b)),
        Value::Integer(i) => Some(PlatformValue::Int(*i)),
        Value::Float(f) => Some(PlatformValue::Float(*f)),
        Value::String(s) => Some(PlatformValue::String(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Map a hub attribute value to a platform characteristic value
///
/// `target` selects the characteristic being filled where one attribute
/// feeds several (current vs target state, detected flag vs level).
pub fn to_platform_value(
    attribute: &str,
    raw: &Value,
    target: Option<CharacteristicType>,
    opts: &TransformOptions,
) -> Option<PlatformValue> {
    use CharacteristicType as C;

    match attribute {
        "switch" => {
            let on = raw.text_eq("on");
            match target {
                Some(C::Active) | Some(C::InUse) => Some(PlatformValue::Int(i64::from(on))),
                _ => Some(PlatformValue::Bool(on)),
            }
        }
        "door" => {
            let is_target = target == Some(C::TargetDoorState);
            let state = match text(raw).as_str() {
                "open" => door::OPEN,
                "closed" => door::CLOSED,
                "opening" if is_target => door::OPEN,
                "opening" => door::OPENING,
                "closing" if is_target => door::CLOSED,
                "closing" => door::CLOSING,
                _ if is_target => return None,
                _ => door::STOPPED,
            };
            Some(PlatformValue::Int(state))
        }
        "lock" => {
            let state = text(raw);
            if target == Some(C::LockTargetState) {
                let secured = state == "locked";
                return Some(PlatformValue::Int(if secured {
                    lock::SECURED
                } else {
                    lock::UNSECURED
                }));
            }
            let current = match state.as_str() {
                "locked" => lock::SECURED,
                "unlocked" => lock::UNSECURED,
                "jammed" => lock::JAMMED,
                _ => lock::UNKNOWN,
            };
            Some(PlatformValue::Int(current))
        }
        "battery" => {
            let n = clamp_percent(raw.to_number()?);
            if target == Some(C::StatusLowBattery) {
                return Some(PlatformValue::Int(i64::from(n < LOW_BATTERY)));
            }
            Some(PlatformValue::Int(n))
        }
        "colorTemperature" => {
            let kelvin = raw.to_number()?;
            if kelvin <= 0.0 {
                return None;
            }
            Some(PlatformValue::Int((1_000_000.0 / kelvin).round() as i64))
        }
        "level" | "brightness" | "position" => {
            Some(PlatformValue::Int(level(raw.to_number()?, opts)))
        }
        "hue" => Some(PlatformValue::Int(
            (raw.to_number()? * 3.6).round().clamp(0.0, 360.0) as i64,
        )),
        "saturation" | "humidity" | "volume" => {
            Some(PlatformValue::Int(clamp_percent(raw.to_number()?)))
        }
        "temperature" | "heatingSetpoint" | "coolingSetpoint" | "thermostatSetpoint" => Some(
            PlatformValue::Float(to_celsius(raw.to_number()?, opts.temperature_unit)),
        ),
        "speed" => {
            if let Some(n) = raw.to_number() {
                return Some(PlatformValue::Int(clamp_percent(n)));
            }
            let name = text(raw);
            SPEEDS
                .iter()
                .find(|(speed, _)| *speed == name)
                .map(|(_, pct)| PlatformValue::Int(*pct))
        }
        "alarmSystemStatus" => {
            let is_target = target == Some(C::SecuritySystemTargetState);
            let state = text(raw);
            let mapped = match state.as_str() {
                "armedhome" => security::STAY_ARM,
                "armedaway" => security::AWAY_ARM,
                "armednight" => security::NIGHT_ARM,
                "disarmed" => security::DISARMED,
                s if s.starts_with("intrusion") && !is_target => security::ALARM_TRIGGERED,
                _ => return None,
            };
            Some(PlatformValue::Int(mapped))
        }
        "thermostatMode" => {
            let mode = match text(raw).as_str() {
                "off" => heating_cooling::OFF,
                "heat" | "emergency heat" => heating_cooling::HEAT,
                "cool" => heating_cooling::COOL,
                "auto" => heating_cooling::AUTO,
                _ => return None,
            };
            Some(PlatformValue::Int(mode))
        }
        "thermostatOperatingState" => {
            let state = match text(raw).as_str() {
                "heating" | "pending heat" => heating_cooling::HEAT,
                "cooling" | "pending cool" => heating_cooling::COOL,
                _ => heating_cooling::OFF,
            };
            Some(PlatformValue::Int(state))
        }
        "thermostatFanMode" | "fanMode" => Some(PlatformValue::Int(if raw.text_eq("auto") {
            fan_mode::AUTO
        } else {
            fan_mode::MANUAL
        })),
        "contact" => Some(PlatformValue::Int(i64::from(!raw.text_eq("closed")))),
        "motion" | "acceleration" => Some(PlatformValue::Bool(raw.text_eq("active"))),
        "presence" => Some(flag(raw, "present")),
        "water" => Some(flag(raw, "wet")),
        "smoke" | "carbonMonoxide" | "tamper" => Some(flag(raw, "detected")),
        "carbonDioxide" => {
            let ppm = raw.to_number()?;
            if target == Some(C::CarbonDioxideDetected) {
                return Some(PlatformValue::Int(i64::from(ppm >= CO2_DETECTED_PPM)));
            }
            Some(PlatformValue::Float(ppm))
        }
        "illuminance" => Some(PlatformValue::Float(
            raw.to_number()?.clamp(0.0001, 100_000.0),
        )),
        "windowShade" => {
            let state = match text(raw).as_str() {
                "opening" => position::INCREASING,
                "closing" => position::DECREASING,
                _ => position::STOPPED,
            };
            Some(PlatformValue::Int(state))
        }
        "valve" => Some(flag(raw, "open")),
        "mute" => Some(PlatformValue::Bool(raw.text_eq("muted"))),
        "filterStatus" => Some(flag(raw, "replace")),
        _ => pass_through(raw),
    }
}

fn speed_name(pct: i64) -> &'static str {
    match pct {
        i64::MIN..=0 => "off",
        1..=20 => "low",
        21..=40 => "medium-low",
        41..=60 => "medium",
        61..=80 => "medium-high",
        _ => "high",
    }
}

/// Map a platform characteristic write to a hub command
pub fn to_hub_command(
    attribute: &str,
    value: &PlatformValue,
    opts: &TransformOptions,
) -> Option<HubCommand> {
    match attribute {
        "switch" => Some(HubCommand::bare(if value.as_bool()? { "on" } else { "off" })),
        "door" => match value.as_i64()? {
            door::OPEN => Some(HubCommand::bare("open")),
            door::CLOSED => Some(HubCommand::bare("close")),
            _ => None,
        },
        "lock" => match value.as_i64()? {
            lock::SECURED => Some(HubCommand::bare("lock")),
            lock::UNSECURED => Some(HubCommand::bare("unlock")),
            _ => None,
        },
        "colorTemperature" => {
            let mired = value.as_f64()?;
            if mired <= 0.0 {
                return None;
            }
            Some(HubCommand::with_value(
                "setColorTemperature",
                (1_000_000.0 / mired).round() as i64,
            ))
        }
        "level" | "brightness" => Some(HubCommand::with_value(
            "setLevel",
            clamp_percent(value.as_f64()?),
        )),
        "position" => Some(HubCommand::with_value(
            "setPosition",
            clamp_percent(value.as_f64()?),
        )),
        "hue" => {
            let hue = ((value.as_f64()? / 3.6).round() as i64).clamp(1, 100);
            Some(HubCommand::with_value("setHue", hue))
        }
        "saturation" => Some(HubCommand::with_value(
            "setSaturation",
            clamp_percent(value.as_f64()?),
        )),
        "volume" => Some(HubCommand::with_value(
            "setVolume",
            clamp_percent(value.as_f64()?),
        )),
        "heatingSetpoint" | "coolingSetpoint" | "thermostatSetpoint" => {
            let command = match attribute {
                "heatingSetpoint" => "setHeatingSetpoint",
                "coolingSetpoint" => "setCoolingSetpoint",
                _ => "setThermostatSetpoint",
            };
            let hub = from_celsius(value.as_f64()?, opts.temperature_unit);
            let hub_value = if hub.fract() == 0.0 {
                Value::Integer(hub as i64)
            } else {
                Value::Float(hub)
            };
            Some(HubCommand::with_value(command, hub_value))
        }
        "speed" => Some(HubCommand::with_value(
            "setSpeed",
            speed_name(value.as_i64()?),
        )),
        "alarmSystemStatus" => {
            let status = match value.as_i64()? {
                security::STAY_ARM => "armHome",
                security::AWAY_ARM => "armAway",
                security::NIGHT_ARM => "armNight",
                security::DISARMED => "disarm",
                _ => return None,
            };
            Some(HubCommand::with_value("setAlarmSystemStatus", status))
        }
        "thermostatMode" => {
            let mode = match value.as_i64()? {
                heating_cooling::OFF => "off",
                heating_cooling::HEAT => "heat",
                heating_cooling::COOL => "cool",
                heating_cooling::AUTO => "auto",
                _ => return None,
            };
            Some(HubCommand::with_value("setThermostatMode", mode))
        }
        "thermostatFanMode" => {
            let mode = if value.as_i64()? == fan_mode::AUTO {
                "auto"
            } else {
                "on"
            };
            Some(HubCommand::with_value("setThermostatFanMode", mode))
        }
        "fanMode" => {
            if value.as_i64()? == fan_mode::AUTO {
                Some(HubCommand::with_value("setSpeed", "auto"))
            } else {
                Some(HubCommand::bare("on"))
            }
        }
        "valve" => Some(HubCommand::bare(if value.as_bool()? { "open" } else { "close" })),
        "mute" => Some(HubCommand::bare(if value.as_bool()? { "mute" } else { "unmute" })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CharacteristicType as C;

    fn opts() -> TransformOptions {
        TransformOptions::default()
    }

    fn platform(attribute: &str, raw: impl Into<Value>) -> Option<PlatformValue> {
        to_platform_value(attribute, &raw.into(), None, &opts())
    }

    fn target(attribute: &str, raw: impl Into<Value>, ch: C) -> Option<PlatformValue> {
        to_platform_value(attribute, &raw.into(), Some(ch), &opts())
    }

    fn command(attribute: &str, value: impl Into<PlatformValue>) -> Option<HubCommand> {
        to_hub_command(attribute, &value.into(), &opts())
    }

    #[test]
    fn test_switch_both_ways() {
        assert_eq!(platform("switch", "on"), Some(PlatformValue::Bool(true)));
        assert_eq!(platform("switch", "off"), Some(PlatformValue::Bool(false)));
        assert_eq!(target("switch", "on", C::Active), Some(PlatformValue::Int(1)));
        assert_eq!(command("switch", true), Some(HubCommand::bare("on")));
        assert_eq!(command("switch", false), Some(HubCommand::bare("off")));
    }

    #[test]
    fn test_levels_round_at_the_edges() {
        assert_eq!(platform("level", "55"), Some(PlatformValue::Int(55)));
        assert_eq!(platform("level", "3"), Some(PlatformValue::Int(0)));
        assert_eq!(platform("level", 97), Some(PlatformValue::Int(100)));
        assert_eq!(platform("level", 150), Some(PlatformValue::Int(100)));

        let exact = TransformOptions {
            round_levels: false,
            ..opts()
        };
        assert_eq!(
            to_platform_value("level", &Value::from("3"), None, &exact),
            Some(PlatformValue::Int(3))
        );
        assert_eq!(
            command("level", 42i64),
            Some(HubCommand::with_value("setLevel", 42i64))
        );
        assert_eq!(
            command("position", 30i64),
            Some(HubCommand::with_value("setPosition", 30i64))
        );
    }

    #[test]
    fn test_non_numeric_is_a_no_op() {
        assert_eq!(platform("level", "bright"), None);
        assert_eq!(platform("battery", Value::Null), None);
        assert_eq!(platform("temperature", "n/a"), None);
    }

    #[test]
    fn test_hue_round_trip() {
        assert_eq!(platform("hue", 50), Some(PlatformValue::Int(180)));
        assert_eq!(command("hue", 180i64), Some(HubCommand::with_value("setHue", 50i64)));
        assert_eq!(command("hue", 0i64), Some(HubCommand::with_value("setHue", 1i64)));
        assert_eq!(platform("hue", 130), Some(PlatformValue::Int(360)));
        assert_eq!(platform("hue", -5), Some(PlatformValue::Int(0)));
    }

    #[test]
    fn test_color_temperature_round_trip() {
        let kelvin = match command("colorTemperature", 300i64) {
            Some(HubCommand {
                value: Some(Value::Integer(k)),
                ..
            }) => k,
            other => panic!("unexpected command {:?}", other),
        };
        assert_eq!(kelvin, 3333);
        let mired = platform("colorTemperature", kelvin).and_then(|v| v.as_i64()).unwrap();
        assert!((mired - 300).abs() <= 1);
        assert_eq!(platform("colorTemperature", 0), None);
    }

    #[test]
    fn test_door_current_and_target() {
        assert_eq!(platform("door", "open"), Some(PlatformValue::Int(door::OPEN)));
        assert_eq!(platform("door", "opening"), Some(PlatformValue::Int(door::OPENING)));
        assert_eq!(
            target("door", "opening", C::TargetDoorState),
            Some(PlatformValue::Int(door::OPEN))
        );
        assert_eq!(
            target("door", "closing", C::TargetDoorState),
            Some(PlatformValue::Int(door::CLOSED))
        );
        assert_eq!(platform("door", "unknown"), Some(PlatformValue::Int(door::STOPPED)));
        assert_eq!(target("door", "unknown", C::TargetDoorState), None);
        assert_eq!(command("door", door::OPEN), Some(HubCommand::bare("open")));
        assert_eq!(command("door", door::CLOSED), Some(HubCommand::bare("close")));
    }

    #[test]
    fn test_lock_states() {
        assert_eq!(platform("lock", "locked"), Some(PlatformValue::Int(lock::SECURED)));
        assert_eq!(platform("lock", "jammed"), Some(PlatformValue::Int(lock::JAMMED)));
        assert_eq!(platform("lock", "weird"), Some(PlatformValue::Int(lock::UNKNOWN)));
        assert_eq!(
            target("lock", "jammed", C::LockTargetState),
            Some(PlatformValue::Int(lock::UNSECURED))
        );
        assert_eq!(command("lock", 1i64), Some(HubCommand::bare("lock")));
        assert_eq!(command("lock", 0i64), Some(HubCommand::bare("unlock")));
    }

    #[test]
    fn test_battery_and_low_battery() {
        assert_eq!(platform("battery", "120"), Some(PlatformValue::Int(100)));
        assert_eq!(target("battery", 19, C::StatusLowBattery), Some(PlatformValue::Int(1)));
        assert_eq!(target("battery", 20, C::StatusLowBattery), Some(PlatformValue::Int(0)));
    }

    #[test]
    fn test_temperatures() {
        assert_eq!(platform("temperature", 72), Some(PlatformValue::Float(22.2)));
        let celsius = TransformOptions {
            temperature_unit: TemperatureUnit::Celsius,
            ..opts()
        };
        assert_eq!(
            to_platform_value("temperature", &Value::from(21.46), None, &celsius),
            Some(PlatformValue::Float(21.5))
        );
        assert_eq!(
            command("heatingSetpoint", 21.0),
            Some(HubCommand::with_value("setHeatingSetpoint", 70i64))
        );
        assert_eq!(
            to_hub_command("coolingSetpoint", &PlatformValue::Float(22.3), &celsius),
            Some(HubCommand::with_value("setCoolingSetpoint", 22.5))
        );
        assert_eq!(command("temperature", 21.0), None);
    }

    #[test]
    fn test_speed_buckets() {
        assert_eq!(platform("speed", "medium-low"), Some(PlatformValue::Int(40)));
        assert_eq!(platform("speed", "auto"), Some(PlatformValue::Int(100)));
        assert_eq!(platform("speed", "turbo"), None);
        assert_eq!(command("speed", 0i64), Some(HubCommand::with_value("setSpeed", "off")));
        assert_eq!(command("speed", 20i64), Some(HubCommand::with_value("setSpeed", "low")));
        assert_eq!(command("speed", 21i64), Some(HubCommand::with_value("setSpeed", "medium-low")));
        assert_eq!(command("speed", 60i64), Some(HubCommand::with_value("setSpeed", "medium")));
        assert_eq!(command("speed", 81i64), Some(HubCommand::with_value("setSpeed", "high")));
    }

    #[test]
    fn test_alarm_system() {
        assert_eq!(
            platform("alarmSystemStatus", "armedNight"),
            Some(PlatformValue::Int(security::NIGHT_ARM))
        );
        assert_eq!(
            platform("alarmSystemStatus", "intrusion"),
            Some(PlatformValue::Int(security::ALARM_TRIGGERED))
        );
        assert_eq!(
            target("alarmSystemStatus", "intrusion", C::SecuritySystemTargetState),
            None
        );
        assert_eq!(
            command("alarmSystemStatus", security::NIGHT_ARM),
            Some(HubCommand::with_value("setAlarmSystemStatus", "armNight"))
        );
        assert_eq!(
            command("alarmSystemStatus", security::DISARMED),
            Some(HubCommand::with_value("setAlarmSystemStatus", "disarm"))
        );
    }

    #[test]
    fn test_thermostat_modes() {
        assert_eq!(
            platform("thermostatMode", "emergency heat"),
            Some(PlatformValue::Int(heating_cooling::HEAT))
        );
        assert_eq!(
            platform("thermostatOperatingState", "pending cool"),
            Some(PlatformValue::Int(heating_cooling::COOL))
        );
        assert_eq!(
            platform("thermostatOperatingState", "fan only"),
            Some(PlatformValue::Int(heating_cooling::OFF))
        );
        assert_eq!(
            command("thermostatMode", heating_cooling::AUTO),
            Some(HubCommand::with_value("setThermostatMode", "auto"))
        );
        assert_eq!(
            command("thermostatFanMode", fan_mode::MANUAL),
            Some(HubCommand::with_value("setThermostatFanMode", "on"))
        );
    }

    #[test]
    fn test_sensor_flags() {
        assert_eq!(platform("contact", "closed"), Some(PlatformValue::Int(0)));
        assert_eq!(platform("contact", "open"), Some(PlatformValue::Int(1)));
        assert_eq!(platform("motion", "active"), Some(PlatformValue::Bool(true)));
        assert_eq!(platform("presence", "present"), Some(PlatformValue::Int(1)));
        assert_eq!(platform("water", "dry"), Some(PlatformValue::Int(0)));
        assert_eq!(platform("smoke", "detected"), Some(PlatformValue::Int(1)));
        assert_eq!(platform("tamper", "clear"), Some(PlatformValue::Int(0)));
        assert_eq!(platform("filterStatus", "replace"), Some(PlatformValue::Int(1)));
        assert_eq!(platform("windowShade", "opening"), Some(PlatformValue::Int(1)));
        assert_eq!(platform("windowShade", "partially open"), Some(PlatformValue::Int(2)));
    }

    #[test]
    fn test_carbon_dioxide_and_illuminance() {
        assert_eq!(platform("carbonDioxide", 800), Some(PlatformValue::Float(800.0)));
        assert_eq!(
            target("carbonDioxide", 2000, C::CarbonDioxideDetected),
            Some(PlatformValue::Int(1))
        );
        assert_eq!(platform("illuminance", 0), Some(PlatformValue::Float(0.0001)));
    }

    #[test]
    fn test_valve_mute_and_fan_mode_commands() {
        assert_eq!(command("valve", 1i64), Some(HubCommand::bare("open")));
        assert_eq!(command("valve", 0i64), Some(HubCommand::bare("close")));
        assert_eq!(command("mute", true), Some(HubCommand::bare("mute")));
        assert_eq!(
            command("fanMode", fan_mode::AUTO),
            Some(HubCommand::with_value("setSpeed", "auto"))
        );
        assert_eq!(command("fanMode", fan_mode::MANUAL), Some(HubCommand::bare("on")));
    }

    #[test]
    fn test_unknown_attributes_pass_through() {
        assert_eq!(platform("powerSource", "mains"), Some(PlatformValue::from("mains")));
        assert_eq!(platform("energy", 1.5), Some(PlatformValue::Float(1.5)));
        assert_eq!(command("powerSource", "mains"), None);
    }
}
