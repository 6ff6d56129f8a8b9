/*!
 * Capability classification.
 *
 * Decides which platform roles a hub device plays by walking an ordered rule
 * table once. Order matters: some roles (`outlet`, `switch_device`) only
 * apply when nothing earlier in the table matched, so a dimmer is a light and
 * not also a bare switch.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hubbridge_core::config::ClassifierSettings;

use crate::device::{DeviceDescriptor, DeviceError, Result};
use crate::platform::ServiceType;

/// Heuristics that can be switched on per installation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Treat switches with "fan" in their name as fans
    pub consider_fan_by_name: bool,
    /// Treat switches with "light" in their name as lights
    pub consider_light_by_name: bool,
}

impl From<&ClassifierSettings> for ClassifierConfig {
    fn from(settings: &ClassifierSettings) -> Self {
        Self {
            consider_fan_by_name: settings.consider_fan_by_name,
            consider_light_by_name: settings.consider_light_by_name,
        }
    }
}

/// A role a device can play on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Role {
    WindowCovering,
    Light,
    AirPurifier,
    GarageDoor,
    Lock,
    Valve,
    Fan,
    Speaker,
    VirtualMode,
    VirtualPiston,
    Button,
    MotionSensor,
    PresenceSensor,
    TemperatureSensor,
    HumiditySensor,
    IlluminanceSensor,
    ContactSensor,
    WaterSensor,
    SmokeDetector,
    CarbonMonoxide,
    CarbonDioxide,
    AccelerationSensor,
    Thermostat,
    AlarmSystem,
    FilterMaintenance,
    Outlet,
    SwitchDevice,
    Battery,
}

/// The rule table, in evaluation order
pub const RULES: [Role; 28] = [
    Role::WindowCovering,
    Role::Light,
    Role::AirPurifier,
    Role::GarageDoor,
    Role::Lock,
    Role::Valve,
    Role::Fan,
    Role::Speaker,
    Role::VirtualMode,
    Role::VirtualPiston,
    Role::Button,
    Role::MotionSensor,
    Role::PresenceSensor,
    Role::TemperatureSensor,
    Role::HumiditySensor,
    Role::IlluminanceSensor,
    Role::ContactSensor,
    Role::WaterSensor,
    Role::SmokeDetector,
    Role::CarbonMonoxide,
    Role::CarbonDioxide,
    Role::AccelerationSensor,
    Role::Thermostat,
    Role::AlarmSystem,
    Role::FilterMaintenance,
    Role::Outlet,
    Role::SwitchDevice,
    Role::Battery,
];

const SETPOINT_COMMANDS: [&str; 3] = [
    "setHeatingSetpoint",
    "setCoolingSetpoint",
    "setThermostatSetpoint",
];

impl Role {
    /// Snake-case name used in logs and configuration
    pub fn name(&self) -> &'static str {
        match self {
            Role::WindowCovering => "window_covering",
            Role::Light => "light",
            Role::AirPurifier => "air_purifier",
            Role::GarageDoor => "garage_door",
            Role::Lock => "lock",
            Role::Valve => "valve",
            Role::Fan => "fan",
            Role::Speaker => "speaker",
            Role::VirtualMode => "virtual_mode",
            Role::VirtualPiston => "virtual_piston",
            Role::Button => "button",
            Role::MotionSensor => "motion_sensor",
            Role::PresenceSensor => "presence_sensor",
            Role::TemperatureSensor => "temperature_sensor",
            Role::HumiditySensor => "humidity_sensor",
            Role::IlluminanceSensor => "illuminance_sensor",
            Role::ContactSensor => "contact_sensor",
            Role::WaterSensor => "water_sensor",
            Role::SmokeDetector => "smoke_detector",
            Role::CarbonMonoxide => "carbon_monoxide",
            Role::CarbonDioxide => "carbon_dioxide",
            Role::AccelerationSensor => "acceleration_sensor",
            Role::Thermostat => "thermostat",
            Role::AlarmSystem => "alarm_system",
            Role::FilterMaintenance => "filter_maintenance",
            Role::Outlet => "outlet",
            Role::SwitchDevice => "switch_device",
            Role::Battery => "battery",
        }
    }

    /// Platform service type backing the role
    pub fn service_type(&self) -> ServiceType {
        match self {
            Role::WindowCovering => ServiceType::WindowCovering,
            Role::Light => ServiceType::Lightbulb,
            Role::AirPurifier => ServiceType::AirPurifier,
            Role::GarageDoor => ServiceType::GarageDoorOpener,
            Role::Lock => ServiceType::LockMechanism,
            Role::Valve => ServiceType::Valve,
            Role::Fan => ServiceType::Fanv2,
            Role::Speaker => ServiceType::Speaker,
            Role::VirtualMode | Role::VirtualPiston | Role::SwitchDevice => ServiceType::Switch,
            Role::Button => ServiceType::StatelessProgrammableSwitch,
            Role::MotionSensor | Role::AccelerationSensor => ServiceType::MotionSensor,
            Role::PresenceSensor => ServiceType::OccupancySensor,
            Role::TemperatureSensor => ServiceType::TemperatureSensor,
            Role::HumiditySensor => ServiceType::HumiditySensor,
            Role::IlluminanceSensor => ServiceType::LightSensor,
            Role::ContactSensor => ServiceType::ContactSensor,
            Role::WaterSensor => ServiceType::LeakSensor,
            Role::SmokeDetector => ServiceType::SmokeSensor,
            Role::CarbonMonoxide => ServiceType::CarbonMonoxideSensor,
            Role::CarbonDioxide => ServiceType::CarbonDioxideSensor,
            Role::Thermostat => ServiceType::Thermostat,
            Role::AlarmSystem => ServiceType::SecuritySystem,
            Role::FilterMaintenance => ServiceType::FilterMaintenance,
            Role::Outlet => ServiceType::Outlet,
            Role::Battery => ServiceType::Battery,
        }
    }

    /// Service subtype, for roles sharing a service type with another role
    pub fn service_subtype(&self) -> Option<&'static str> {
        match self {
            Role::AccelerationSensor => Some("acceleration"),
            _ => None,
        }
    }

    /// Whether the role is dropped when an earlier role already matched
    pub fn exclusive_when_first(&self) -> bool {
        matches!(self, Role::Outlet | Role::SwitchDevice)
    }

    /// Attributes whose changes the role's binding reacts to
    pub fn relevant_attributes(&self) -> &'static [&'static str] {
        match self {
            Role::WindowCovering => &["position", "level", "windowShade"],
            Role::Light => &["switch", "level", "hue", "saturation", "colorTemperature"],
            Role::AirPurifier => &["switch", "fanMode", "tamper"],
            Role::GarageDoor => &["door", "obstruction"],
            Role::Lock => &["lock"],
            Role::Valve => &["valve"],
            Role::Fan => &["switch", "speed", "level"],
            Role::Speaker => &["mute", "volume"],
            Role::VirtualMode | Role::VirtualPiston | Role::SwitchDevice => &["switch"],
            Role::Button => &["pushed", "held", "doubleTapped"],
            Role::MotionSensor => &["motion", "tamper"],
            Role::PresenceSensor => &["presence"],
            Role::TemperatureSensor => &["temperature", "tamper"],
            Role::HumiditySensor => &["humidity", "tamper"],
            Role::IlluminanceSensor => &["illuminance"],
            Role::ContactSensor => &["contact", "tamper"],
            Role::WaterSensor => &["water", "tamper"],
            Role::SmokeDetector => &["smoke", "tamper"],
            Role::CarbonMonoxide => &["carbonMonoxide", "tamper"],
            Role::CarbonDioxide => &["carbonDioxide", "tamper"],
            Role::AccelerationSensor => &["acceleration", "tamper"],
            Role::Thermostat => &[
                "temperature",
                "humidity",
                "thermostatMode",
                "thermostatOperatingState",
                "heatingSetpoint",
                "coolingSetpoint",
                "thermostatSetpoint",
            ],
            Role::AlarmSystem => &["alarmSystemStatus"],
            Role::FilterMaintenance => &["filterStatus"],
            Role::Outlet => &["switch"],
            Role::Battery => &["battery"],
        }
    }

    /// Whether an attribute change concerns the role
    pub fn is_relevant(&self, attribute: &str) -> bool {
        self.relevant_attributes().contains(&attribute)
    }

    /// Evaluate the role's predicate against a device
    pub fn matches(&self, device: &DeviceDescriptor, config: &ClassifierConfig) -> bool {
        let cap = |c: &str| device.has_capability(c);
        match self {
            Role::WindowCovering => device.has_any_capability(&["WindowShade", "WindowBlind"]),
            Role::Light => {
                cap("Switch")
                    && (device.has_any_capability(&[
                        "LightBulb",
                        "Bulb",
                        "Light",
                        "Fan Light",
                        "Color Control",
                        "Color Temperature",
                    ]) || (config.consider_light_by_name && device.name_contains("light")))
            }
            Role::AirPurifier => cap("AirPurifier"),
            Role::GarageDoor => cap("GarageDoorControl"),
            Role::Lock => cap("Lock"),
            Role::Valve => cap("Valve"),
            Role::Fan => {
                (device.has_any_capability(&["Fan", "FanControl"])
                    || device.has_command("setSpeed")
                    || (config.consider_fan_by_name && device.name_contains("fan")))
                    && !cap("LightBulb")
            }
            Role::Speaker => {
                cap("AudioVolume")
                    || (cap("AudioMute") && device.has_any_capability(&["MusicPlayer", "Speaker"]))
            }
            Role::VirtualMode => cap("Mode"),
            Role::VirtualPiston => cap("Piston"),
            Role::Button => device.has_any_capability(&[
                "PushableButton",
                "HoldableButton",
                "DoubleTapableButton",
            ]),
            Role::MotionSensor => cap("MotionSensor"),
            Role::PresenceSensor => cap("PresenceSensor"),
            Role::TemperatureSensor => cap("TemperatureMeasurement") && !cap("Thermostat"),
            Role::HumiditySensor => cap("RelativeHumidityMeasurement") && !cap("Thermostat"),
            Role::IlluminanceSensor => cap("IlluminanceMeasurement"),
            Role::ContactSensor => cap("ContactSensor") && !cap("GarageDoorControl"),
            Role::WaterSensor => cap("WaterSensor"),
            Role::SmokeDetector => cap("SmokeDetector"),
            Role::CarbonMonoxide => cap("CarbonMonoxideDetector"),
            Role::CarbonDioxide => cap("CarbonDioxideMeasurement"),
            Role::AccelerationSensor => cap("AccelerationSensor"),
            Role::Thermostat => {
                cap("Thermostat")
                    || (cap("ThermostatOperatingState")
                        && SETPOINT_COMMANDS.iter().any(|c| device.has_command(c)))
            }
            Role::AlarmSystem => cap("AlarmSystemStatus") || device.has_attribute("alarmSystemStatus"),
            Role::FilterMaintenance => cap("FilterStatus"),
            Role::Outlet => cap("Outlet") && cap("Switch"),
            Role::SwitchDevice => cap("Switch"),
            Role::Battery => cap("Battery"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One matched role and the service it is exposed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleMatch {
    /// Matched role
    pub role: Role,
    /// Service type backing the role
    pub service_type: ServiceType,
}

/// Outcome of classifying one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Matched roles in rule-table order
    pub matched: Vec<RoleMatch>,
    /// Exclusive roles whose predicate held but that were dropped
    pub blocked: Vec<Role>,
}

impl Classification {
    /// Matched roles in order
    pub fn roles(&self) -> Vec<Role> {
        self.matched.iter().map(|m| m.role).collect()
    }

    /// Whether a role matched
    pub fn has_role(&self, role: Role) -> bool {
        self.matched.iter().any(|m| m.role == role)
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Classify a device against the rule table
pub fn classify(device: &DeviceDescriptor, config: &ClassifierConfig) -> Classification {
    let mut classification = Classification::default();

    for role in RULES {
        if !role.matches(device, config) {
            continue;
        }
        if role.exclusive_when_first() && !classification.matched.is_empty() {
            debug!(
                "Role {} blocked for device {} ({}): already matched {:?}",
                role,
                device.id,
                device.label,
                classification.roles()
            );
            classification.blocked.push(role);
            continue;
        }
        classification.matched.push(RoleMatch {
            role,
            service_type: role.service_type(),
        });
    }

    classification
}

/// Classify a device, treating an empty outcome as an error
pub fn classify_or_fail(
    device: &DeviceDescriptor,
    config: &ClassifierConfig,
) -> Result<Classification> {
    let classification = classify(device, config);
    if classification.is_empty() {
        return Err(DeviceError::Classification(device.id.clone()));
    }
    Ok(classification)
}
