/*!
 * Smart-home platform object model.
 *
 * The bridge exposes every hub device as an accessory made of services, each
 * holding characteristics with optional get/set handlers. Bindings talk to
 * the accessory only through the `ServicesFacade` trait; `MemoryAccessory` is
 * the in-process implementation and `AccessoryHost` owns the accessories.
 */
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Platform service types used by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    /// Name, manufacturer, model, serial and firmware of the accessory
    AccessoryInformation,
    /// Dimmable or colored light
    Lightbulb,
    /// Fan with speed control
    Fanv2,
    /// Plain switch
    Switch,
    /// Wall outlet
    Outlet,
    /// Door lock
    LockMechanism,
    /// Garage door opener
    GarageDoorOpener,
    /// Blinds and shades
    WindowCovering,
    /// Water valve
    Valve,
    /// Audio output
    Speaker,
    /// Air purifier
    AirPurifier,
    /// Thermostat
    Thermostat,
    /// Alarm panel
    SecuritySystem,
    /// Filter status
    FilterMaintenance,
    /// Stateless button
    StatelessProgrammableSwitch,
    /// Motion sensor
    MotionSensor,
    /// Occupancy sensor
    OccupancySensor,
    /// Temperature sensor
    TemperatureSensor,
    /// Humidity sensor
    HumiditySensor,
    /// Light level sensor
    LightSensor,
    /// Contact sensor
    ContactSensor,
    /// Leak sensor
    LeakSensor,
    /// Smoke sensor
    SmokeSensor,
    /// Carbon monoxide sensor
    CarbonMonoxideSensor,
    /// Carbon dioxide sensor
    CarbonDioxideSensor,
    /// Battery
    Battery,
}

impl ServiceType {
    /// Platform name of the service type
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::AccessoryInformation => "AccessoryInformation",
            ServiceType::Lightbulb => "Lightbulb",
            ServiceType::Fanv2 => "Fanv2",
            ServiceType::Switch => "Switch",
            ServiceType::Outlet => "Outlet",
            ServiceType::LockMechanism => "LockMechanism",
            ServiceType::GarageDoorOpener => "GarageDoorOpener",
            ServiceType::WindowCovering => "WindowCovering",
            ServiceType::Valve => "Valve",
            ServiceType::Speaker => "Speaker",
            ServiceType::AirPurifier => "AirPurifier",
            ServiceType::Thermostat => "Thermostat",
            ServiceType::SecuritySystem => "SecuritySystem",
            ServiceType::FilterMaintenance => "FilterMaintenance",
            ServiceType::StatelessProgrammableSwitch => "StatelessProgrammableSwitch",
            ServiceType::MotionSensor => "MotionSensor",
            ServiceType::OccupancySensor => "OccupancySensor",
            ServiceType::TemperatureSensor => "TemperatureSensor",
            ServiceType::HumiditySensor => "HumiditySensor",
            ServiceType::LightSensor => "LightSensor",
            ServiceType::ContactSensor => "ContactSensor",
            ServiceType::LeakSensor => "LeakSensor",
            ServiceType::SmokeSensor => "SmokeSensor",
            ServiceType::CarbonMonoxideSensor => "CarbonMonoxideSensor",
            ServiceType::CarbonDioxideSensor => "CarbonDioxideSensor",
            ServiceType::Battery => "Battery",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform characteristic types used by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CharacteristicType {
    // Accessory information
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    FirmwareRevision,
    // Switching and lighting
    On,
    OutletInUse,
    Brightness,
    Hue,
    Saturation,
    ColorTemperature,
    // Fans and purifiers
    Active,
    RotationSpeed,
    CurrentFanState,
    TargetFanState,
    CurrentAirPurifierState,
    TargetAirPurifierState,
    // Doors, locks and coverings
    CurrentDoorState,
    TargetDoorState,
    ObstructionDetected,
    LockCurrentState,
    LockTargetState,
    CurrentPosition,
    TargetPosition,
    PositionState,
    // Valves
    InUse,
    ValveType,
    // Audio
    Mute,
    Volume,
    // Climate
    CurrentTemperature,
    TargetTemperature,
    HeatingThresholdTemperature,
    CoolingThresholdTemperature,
    TemperatureDisplayUnits,
    CurrentHeatingCoolingState,
    TargetHeatingCoolingState,
    CurrentRelativeHumidity,
    // Security
    SecuritySystemCurrentState,
    SecuritySystemTargetState,
    // Buttons
    ProgrammableSwitchEvent,
    ServiceLabelIndex,
    // Sensors
    CurrentAmbientLightLevel,
    ContactSensorState,
    MotionDetected,
    OccupancyDetected,
    LeakDetected,
    SmokeDetected,
    CarbonMonoxideDetected,
    CarbonDioxideDetected,
    CarbonDioxideLevel,
    StatusTampered,
    StatusActive,
    // Maintenance and power
    FilterChangeIndication,
    BatteryLevel,
    StatusLowBattery,
    ChargingState,
}

impl fmt::Display for CharacteristicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Numeric constants of the platform's enumerated characteristics
pub mod consts {
    /// `CurrentDoorState` / `TargetDoorState`
    pub mod door {
        /// Open
        pub const OPEN: i64 = 0;
        /// Closed
        pub const CLOSED: i64 = 1;
        /// Opening
        pub const OPENING: i64 = 2;
        /// Closing
        pub const CLOSING: i64 = 3;
        /// Stopped
        pub const STOPPED: i64 = 4;
    }

    /// `LockCurrentState` / `LockTargetState`
    pub mod lock {
        /// Unsecured
        pub const UNSECURED: i64 = 0;
        /// Secured
        pub const SECURED: i64 = 1;
        /// Jammed
        pub const JAMMED: i64 = 2;
        /// Unknown
        pub const UNKNOWN: i64 = 3;
    }

    /// `SecuritySystemCurrentState` / `SecuritySystemTargetState`
    pub mod security {
        /// Armed, home
        pub const STAY_ARM: i64 = 0;
        /// Armed, away
        pub const AWAY_ARM: i64 = 1;
        /// Armed, night
        pub const NIGHT_ARM: i64 = 2;
        /// Disarmed
        pub const DISARMED: i64 = 3;
        /// Alarm triggered
        pub const ALARM_TRIGGERED: i64 = 4;
    }

    /// `CurrentHeatingCoolingState` / `TargetHeatingCoolingState`
    pub mod heating_cooling {
        /// Off
        pub const OFF: i64 = 0;
        /// Heat
        pub const HEAT: i64 = 1;
        /// Cool
        pub const COOL: i64 = 2;
        /// Auto
        pub const AUTO: i64 = 3;
    }

    /// `PositionState`
    pub mod position {
        /// Closing
        pub const DECREASING: i64 = 0;
        /// Opening
        pub const INCREASING: i64 = 1;
        /// Not moving
        pub const STOPPED: i64 = 2;
    }

    /// `TargetFanState` / `TargetAirPurifierState`
    pub mod fan_mode {
        /// Manual
        pub const MANUAL: i64 = 0;
        /// Auto
        pub const AUTO: i64 = 1;
    }

    /// `ProgrammableSwitchEvent`
    pub mod switch_event {
        /// Single press
        pub const SINGLE: i64 = 0;
        /// Double press
        pub const DOUBLE: i64 = 1;
        /// Long press
        pub const LONG: i64 = 2;
    }

    /// `TemperatureDisplayUnits`
    pub mod display_units {
        /// Celsius
        pub const CELSIUS: i64 = 0;
        /// Fahrenheit
        pub const FAHRENHEIT: i64 = 1;
    }
}

/// A characteristic value in the platform's domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformValue {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
}

impl PlatformValue {
    /// Numeric view of the value, booleans count as 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PlatformValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PlatformValue::Int(i) => Some(*i as f64),
            PlatformValue::Float(f) if f.is_finite() => Some(*f),
            PlatformValue::Float(_) => None,
            PlatformValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        }
    }

    /// Integer view of the value, rounding floats
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|f| f.round() as i64)
    }

    /// Boolean view of the value, numbers are true when non-zero
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlatformValue::Bool(b) => Some(*b),
            PlatformValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => Some(true),
                "false" | "off" => Some(false),
                _ => None,
            },
            other => other.as_f64().map(|f| f != 0.0),
        }
    }
}

impl fmt::Display for PlatformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformValue::Bool(b) => write!(f, "{}", b),
            PlatformValue::Int(i) => write!(f, "{}", i),
            PlatformValue::Float(x) => write!(f, "{}", x),
            PlatformValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for PlatformValue {
    fn from(b: bool) -> Self {
        PlatformValue::Bool(b)
    }
}

impl From<i64> for PlatformValue {
    fn from(i: i64) -> Self {
        PlatformValue::Int(i)
    }
}

impl From<f64> for PlatformValue {
    fn from(f: f64) -> Self {
        PlatformValue::Float(f)
    }
}

impl From<&str> for PlatformValue {
    fn from(s: &str) -> Self {
        PlatformValue::String(s.to_string())
    }
}

/// Constraints published with a characteristic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicProps {
    /// Minimum value
    pub min_value: Option<f64>,
    /// Maximum value
    pub max_value: Option<f64>,
    /// Step between values
    pub min_step: Option<f64>,
    /// Allowed values of an enumerated characteristic
    pub valid_values: Option<Vec<i64>>,
}

impl CharacteristicProps {
    /// Props for a numeric range
    pub fn range(min_value: f64, max_value: f64, min_step: f64) -> Self {
        Self {
            min_value: Some(min_value),
            max_value: Some(max_value),
            min_step: Some(min_step),
            valid_values: None,
        }
    }

    /// Props restricting an enumerated characteristic
    pub fn valid_values(values: Vec<i64>) -> Self {
        Self {
            valid_values: Some(values),
            ..Self::default()
        }
    }
}

/// Identifies a service on an accessory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Service type
    pub service_type: ServiceType,
    /// Distinguishes several services of the same type
    pub subtype: Option<String>,
}

impl ServiceKey {
    /// Key of the primary service of a type
    pub fn primary(service_type: ServiceType) -> Self {
        Self {
            service_type,
            subtype: None,
        }
    }

    /// Key of a secondary service of a type
    pub fn with_subtype(service_type: ServiceType, subtype: impl Into<String>) -> Self {
        Self {
            service_type,
            subtype: Some(subtype.into()),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtype {
            Some(subtype) => write!(f, "{}[{}]", self.service_type, subtype),
            None => write!(f, "{}", self.service_type),
        }
    }
}

/// Produces the current value of a characteristic
pub type GetHandler = Arc<dyn Fn() -> Option<PlatformValue> + Send + Sync>;

/// Receives a value written by the platform
pub type SetHandler = Arc<dyn Fn(PlatformValue) + Send + Sync>;

/// Everything needed to register one characteristic
#[derive(Clone)]
pub struct CharacteristicSpec {
    /// Characteristic type
    pub characteristic: CharacteristicType,
    /// Published constraints
    pub props: Option<CharacteristicProps>,
    /// Read handler
    pub on_get: Option<GetHandler>,
    /// Write handler, absent for read-only characteristics
    pub on_set: Option<SetHandler>,
}

impl CharacteristicSpec {
    /// A characteristic without handlers
    pub fn new(characteristic: CharacteristicType) -> Self {
        Self {
            characteristic,
            props: None,
            on_get: None,
            on_set: None,
        }
    }

    /// Attach constraints
    pub fn props(mut self, props: CharacteristicProps) -> Self {
        self.props = Some(props);
        self
    }

    /// Attach a read handler
    pub fn on_get(mut self, handler: GetHandler) -> Self {
        self.on_get = Some(handler);
        self
    }

    /// Attach a write handler
    pub fn on_set(mut self, handler: SetHandler) -> Self {
        self.on_set = Some(handler);
        self
    }
}

impl fmt::Debug for CharacteristicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicSpec")
            .field("characteristic", &self.characteristic)
            .field("props", &self.props)
            .field("readable", &self.on_get.is_some())
            .field("writable", &self.on_set.is_some())
            .finish()
    }
}

/// The narrow view of an accessory that bindings are allowed to use
pub trait ServicesFacade: Send {
    /// Add a service unless it exists, returning true when it was created
    fn add_service(&mut self, key: &ServiceKey) -> bool;

    /// Check whether a service exists
    fn has_service(&self, key: &ServiceKey) -> bool;

    /// Add or replace a characteristic on an existing service
    ///
    /// Returns false when the service does not exist.
    fn add_characteristic(&mut self, key: &ServiceKey, spec: CharacteristicSpec) -> bool;

    /// Push a new value to the platform
    fn update_value(
        &mut self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
        value: PlatformValue,
    ) -> bool;

    /// Last value pushed or written
    fn value(&self, key: &ServiceKey, characteristic: CharacteristicType) -> Option<PlatformValue>;

    /// Published constraints of a characteristic
    fn props(&self, key: &ServiceKey, characteristic: CharacteristicType)
        -> Option<CharacteristicProps>;

    /// Read handler of a characteristic
    fn get_handler(&self, key: &ServiceKey, characteristic: CharacteristicType)
        -> Option<GetHandler>;

    /// Write handler of a characteristic
    fn set_handler(&self, key: &ServiceKey, characteristic: CharacteristicType)
        -> Option<SetHandler>;

    /// Remove a service with all its characteristics
    fn remove_service(&mut self, key: &ServiceKey) -> bool;

    /// Remove one characteristic
    fn remove_characteristic(&mut self, key: &ServiceKey, characteristic: CharacteristicType)
        -> bool;

    /// All services of the accessory
    fn services(&self) -> Vec<ServiceKey>;

    /// All characteristics of a service
    fn characteristics(&self, key: &ServiceKey) -> Vec<CharacteristicType>;
}

/// An accessory shared between the host, the registry and handler closures
pub type SharedServices = Arc<Mutex<Box<dyn ServicesFacade>>>;

/// Read a characteristic the way the platform does
///
/// Calls the get handler outside the accessory lock and falls back to the
/// last known value when there is no handler or it yields nothing.
pub fn read_characteristic(
    services: &SharedServices,
    key: &ServiceKey,
    characteristic: CharacteristicType,
) -> Option<PlatformValue> {
    let (handler, cached) = {
        let guard = services.lock().unwrap_or_else(PoisonError::into_inner);
        (
            guard.get_handler(key, characteristic),
            guard.value(key, characteristic),
        )
    };
    handler.and_then(|h| h()).or(cached)
}

/// Write a characteristic the way the platform does
///
/// Stores the value, then calls the set handler outside the accessory lock.
/// Returns false when the characteristic is not writable.
pub fn write_characteristic(
    services: &SharedServices,
    key: &ServiceKey,
    characteristic: CharacteristicType,
    value: PlatformValue,
) -> bool {
    let handler = {
        let mut guard = services.lock().unwrap_or_else(PoisonError::into_inner);
        let handler = guard.set_handler(key, characteristic);
        if handler.is_some() {
            guard.update_value(key, characteristic, value.clone());
        }
        handler
    };
    match handler {
        Some(h) => {
            h(value);
            true
        }
        None => false,
    }
}

struct Slot {
    props: Option<CharacteristicProps>,
    value: Option<PlatformValue>,
    on_get: Option<GetHandler>,
    on_set: Option<SetHandler>,
}

/// In-process accessory
pub struct MemoryAccessory {
    id: String,
    name: String,
    services: BTreeMap<ServiceKey, BTreeMap<CharacteristicType, Slot>>,
}

impl MemoryAccessory {
    /// Create an empty accessory
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            services: BTreeMap::new(),
        }
    }

    /// Accessory id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Accessory display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap the accessory for sharing
    pub fn into_shared(self) -> SharedServices {
        let facade: Box<dyn ServicesFacade> = Box::new(self);
        Arc::new(Mutex::new(facade))
    }
}

impl fmt::Debug for MemoryAccessory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<String> = self.services.keys().map(|k| k.to_string()).collect();
        f.debug_struct("MemoryAccessory")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("services", &services)
            .finish()
    }
}

impl ServicesFacade for MemoryAccessory {
    fn add_service(&mut self, key: &ServiceKey) -> bool {
        if self.services.contains_key(key) {
            return false;
        }
        debug!("Adding service {} to accessory {}", key, self.id);
        self.services.insert(key.clone(), BTreeMap::new());
        true
    }

    fn has_service(&self, key: &ServiceKey) -> bool {
        self.services.contains_key(key)
    }

    fn add_characteristic(&mut self, key: &ServiceKey, spec: CharacteristicSpec) -> bool {
        let Some(characteristics) = self.services.get_mut(key) else {
            return false;
        };
        let value = characteristics
            .remove(&spec.characteristic)
            .and_then(|slot| slot.value);
        characteristics.insert(
            spec.characteristic,
            Slot {
                props: spec.props,
                value,
                on_get: spec.on_get,
                on_set: spec.on_set,
            },
        );
        true
    }

    fn update_value(
        &mut self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
        value: PlatformValue,
    ) -> bool {
        match self
            .services
            .get_mut(key)
            .and_then(|c| c.get_mut(&characteristic))
        {
            Some(slot) => {
                slot.value = Some(value);
                true
            }
            None => false,
        }
    }

    fn value(&self, key: &ServiceKey, characteristic: CharacteristicType) -> Option<PlatformValue> {
        self.services
            .get(key)
            .and_then(|c| c.get(&characteristic))
            .and_then(|slot| slot.value.clone())
    }

    fn props(
        &self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
    ) -> Option<CharacteristicProps> {
        self.services
            .get(key)
            .and_then(|c| c.get(&characteristic))
            .and_then(|slot| slot.props.clone())
    }

    fn get_handler(
        &self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
    ) -> Option<GetHandler> {
        self.services
            .get(key)
            .and_then(|c| c.get(&characteristic))
            .and_then(|slot| slot.on_get.clone())
    }

    fn set_handler(
        &self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
    ) -> Option<SetHandler> {
        self.services
            .get(key)
            .and_then(|c| c.get(&characteristic))
            .and_then(|slot| slot.on_set.clone())
    }

    fn remove_service(&mut self, key: &ServiceKey) -> bool {
        self.services.remove(key).is_some()
    }

    fn remove_characteristic(
        &mut self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
    ) -> bool {
        self.services
            .get_mut(key)
            .map(|c| c.remove(&characteristic).is_some())
            .unwrap_or(false)
    }

    fn services(&self) -> Vec<ServiceKey> {
        self.services.keys().cloned().collect()
    }

    fn characteristics(&self, key: &ServiceKey) -> Vec<CharacteristicType> {
        self.services
            .get(key)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Creates and removes the accessories exposed to the platform
pub trait AccessoryHost: Send + Sync {
    /// Return the accessory for a device, creating it if needed
    fn create_accessory(&self, device_id: &str, name: &str) -> SharedServices;

    /// Remove the accessory of a device
    fn remove_accessory(&self, device_id: &str) -> bool;

    /// Ids of all hosted accessories
    fn accessory_ids(&self) -> Vec<String>;
}

/// Host keeping `MemoryAccessory` instances in memory
#[derive(Default)]
pub struct MemoryHost {
    accessories: Mutex<HashMap<String, SharedServices>>,
}

impl MemoryHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Accessory of a device, if hosted
    pub fn accessory(&self, device_id: &str) -> Option<SharedServices> {
        self.accessories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("accessories", &self.accessory_ids())
            .finish()
    }
}

impl AccessoryHost for MemoryHost {
    fn create_accessory(&self, device_id: &str, name: &str) -> SharedServices {
        let mut accessories = self.accessories.lock().unwrap_or_else(PoisonError::into_inner);
        accessories
            .entry(device_id.to_string())
            .or_insert_with(|| MemoryAccessory::new(device_id, name).into_shared())
            .clone()
    }

    fn remove_accessory(&self, device_id: &str) -> bool {
        self.accessories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
            .is_some()
    }

    fn accessory_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .accessories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_characteristic_requires_service() {
        let mut accessory = MemoryAccessory::new("1", "Lamp");
        let key = ServiceKey::primary(ServiceType::Lightbulb);
        assert!(!accessory.add_characteristic(&key, CharacteristicSpec::new(CharacteristicType::On)));

        assert!(accessory.add_service(&key));
        assert!(!accessory.add_service(&key));
        assert!(accessory.add_characteristic(&key, CharacteristicSpec::new(CharacteristicType::On)));
        assert_eq!(accessory.characteristics(&key), vec![CharacteristicType::On]);
    }

    #[test]
    fn test_replacing_characteristic_keeps_value() {
        let mut accessory = MemoryAccessory::new("1", "Lamp");
        let key = ServiceKey::primary(ServiceType::Switch);
        accessory.add_service(&key);
        accessory.add_characteristic(&key, CharacteristicSpec::new(CharacteristicType::On));
        accessory.update_value(&key, CharacteristicType::On, PlatformValue::Bool(true));

        accessory.add_characteristic(
            &key,
            CharacteristicSpec::new(CharacteristicType::On).props(CharacteristicProps::default()),
        );
        assert_eq!(
            accessory.value(&key, CharacteristicType::On),
            Some(PlatformValue::Bool(true))
        );
    }

    #[test]
    fn test_read_and_write_use_handlers() {
        let services = MemoryAccessory::new("1", "Lamp").into_shared();
        let key = ServiceKey::primary(ServiceType::Lightbulb);
        let writes = Arc::new(AtomicUsize::new(0));
        let writes_clone = writes.clone();

        {
            let mut guard = services.lock().unwrap();
            guard.add_service(&key);
            guard.add_characteristic(
                &key,
                CharacteristicSpec::new(CharacteristicType::Brightness)
                    .on_get(Arc::new(|| Some(PlatformValue::Int(55))))
                    .on_set(Arc::new(move |_| {
                        writes_clone.fetch_add(1, Ordering::SeqCst);
                    })),
            );
            guard.add_characteristic(&key, CharacteristicSpec::new(CharacteristicType::Hue));
        }

        assert_eq!(
            read_characteristic(&services, &key, CharacteristicType::Brightness),
            Some(PlatformValue::Int(55))
        );
        assert!(write_characteristic(
            &services,
            &key,
            CharacteristicType::Brightness,
            PlatformValue::Int(20)
        ));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert!(!write_characteristic(
            &services,
            &key,
            CharacteristicType::Hue,
            PlatformValue::Int(20)
        ));
    }

    #[test]
    fn test_subtyped_services_are_distinct() {
        let mut accessory = MemoryAccessory::new("1", "Remote");
        let one = ServiceKey::with_subtype(ServiceType::StatelessProgrammableSwitch, "button1");
        let two = ServiceKey::with_subtype(ServiceType::StatelessProgrammableSwitch, "button2");
        accessory.add_service(&one);
        accessory.add_service(&two);
        assert_eq!(accessory.services().len(), 2);
        assert!(accessory.remove_service(&one));
        assert!(!accessory.has_service(&one));
        assert!(accessory.has_service(&two));
    }

    #[test]
    fn test_platform_value_views() {
        assert_eq!(PlatformValue::Bool(true).as_i64(), Some(1));
        assert_eq!(PlatformValue::Float(49.6).as_i64(), Some(50));
        assert_eq!(PlatformValue::Int(0).as_bool(), Some(false));
        assert_eq!(PlatformValue::from("on").as_bool(), Some(true));
        assert_eq!(PlatformValue::Float(f64::NAN).as_f64(), None);
    }

    #[test]
    fn test_memory_host_reuses_accessories() {
        let host = MemoryHost::new();
        let a = host.create_accessory("1", "Lamp");
        let b = host.create_accessory("1", "Lamp");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.accessory_ids(), vec!["1".to_string()]);
        assert!(host.remove_accessory("1"));
        assert!(host.accessory("1").is_none());
    }
}
