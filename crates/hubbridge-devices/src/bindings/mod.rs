/*!
 * Per-role device bindings.
 *
 * A binding wires one matched role of a device to platform services: it
 * registers characteristics whose get handlers read the device state through
 * the transformer and whose set handlers turn platform writes into hub
 * commands. Bindings remember the services and characteristics they own so
 * that anything left over from an earlier configuration can be swept.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hubbridge_core::logging::device_span;
use hubbridge_core::types::Value;

use crate::classifier::{Classification, Role};
use crate::device::{DeviceDescriptor, SharedDevice};
use crate::platform::{
    CharacteristicProps, CharacteristicSpec, CharacteristicType, GetHandler, PlatformValue,
    ServiceKey, ServiceType, SetHandler, SharedServices,
};
use crate::transform::{self, HubCommand, TransformOptions};

mod access;
mod button;
mod climate;
mod lighting;
mod media;
mod sensors;
mod switches;

/// Transform options shared by every binding and updated at runtime
pub type SharedOptions = Arc<RwLock<TransformOptions>>;

/// A command for the hub produced by a platform write
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Target device
    pub device_id: String,
    /// Command name
    pub command: String,
    /// Positional command arguments
    pub params: Vec<Value>,
}

impl CommandRequest {
    /// Create a request without arguments
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Add an argument
    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Build a request from a transformed command
    pub fn from_hub_command(device_id: &str, command: HubCommand) -> Self {
        Self {
            device_id: device_id.to_string(),
            command: command.command,
            params: command.value.into_iter().collect(),
        }
    }
}

/// Where bindings send their commands
///
/// Submission is fire and forget; delivery is the sink's problem.
pub trait CommandSink: Send + Sync {
    /// Queue a command for the hub
    fn submit(&self, request: CommandRequest);
}

/// Everything a binding needs from its surroundings
#[derive(Clone)]
pub struct BindContext {
    /// Device state, updated by the update pipeline
    pub device: SharedDevice,
    /// Accessory the device is exposed as
    pub services: SharedServices,
    /// Outbound command path
    pub sink: Arc<dyn CommandSink>,
    /// Current transform options
    pub options: SharedOptions,
}

impl BindContext {
    fn snapshot(&self) -> DeviceDescriptor {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Background timers owned by a binding
#[derive(Debug, Clone, Default)]
pub struct TimerSet(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl TimerSet {
    /// Track a timer, forgetting the ones that already finished
    pub fn push(&self, handle: JoinHandle<()>) {
        let mut timers = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|t| !t.is_finished());
        timers.push(handle);
    }

    /// Abort every tracked timer
    pub fn abort_all(&self) {
        let mut timers = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        for timer in timers.drain(..) {
            timer.abort();
        }
    }

    /// Number of timers still running
    pub fn active(&self) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

struct Watch {
    service: ServiceKey,
    characteristic: CharacteristicType,
    attributes: Vec<&'static str>,
    read: GetHandler,
}

/// One matched role of one device, bound to platform services
pub struct DeviceBinding {
    role: Role,
    device_id: String,
    services: BTreeSet<ServiceKey>,
    characteristics: BTreeSet<(ServiceKey, CharacteristicType)>,
    watches: Vec<Watch>,
    timers: TimerSet,
}

impl DeviceBinding {
    fn new(role: Role, device_id: &str) -> Self {
        Self {
            role,
            device_id: device_id.to_string(),
            services: BTreeSet::new(),
            characteristics: BTreeSet::new(),
            watches: Vec::new(),
            timers: TimerSet::default(),
        }
    }

    /// Bound role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Services owned by the binding
    pub fn services(&self) -> &BTreeSet<ServiceKey> {
        &self.services
    }

    /// Whether the binding owns a characteristic
    pub fn owns(&self, service: &ServiceKey, characteristic: CharacteristicType) -> bool {
        self.characteristics
            .contains(&(service.clone(), characteristic))
    }

    /// Role-local timers
    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// React to a changed attribute
    ///
    /// The device state must already hold the new value. Returns false when
    /// the attribute does not concern the role.
    pub fn on_attribute_change(
        &self,
        services: &SharedServices,
        attribute: &str,
        raw: &Value,
        meta: Option<&Value>,
    ) -> bool {
        if !self.role.is_relevant(attribute) {
            return false;
        }

        for watch in self.watches.iter().filter(|w| w.attributes.contains(&attribute)) {
            match (watch.read)() {
                Some(value) => {
                    services
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .update_value(&watch.service, watch.characteristic, value);
                }
                None => warn!(
                    "No {} value for {}={} on device {}, keeping previous",
                    watch.characteristic, attribute, raw, self.device_id
                ),
            }
        }

        if self.role == Role::Button {
            button::on_event(self, services, attribute, raw, meta);
        }
        true
    }
}

impl Drop for DeviceBinding {
    fn drop(&mut self) {
        self.timers.abort_all();
    }
}

impl fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBinding")
            .field("role", &self.role)
            .field("device_id", &self.device_id)
            .field("services", &self.services)
            .field("characteristics", &self.characteristics.len())
            .finish()
    }
}

/// Registers characteristics for one binding and records what it owns
pub(crate) struct Binder<'a> {
    ctx: &'a BindContext,
    device: DeviceDescriptor,
    binding: DeviceBinding,
}

impl<'a> Binder<'a> {
    fn new(role: Role, ctx: &'a BindContext) -> Self {
        let device = ctx.snapshot();
        let binding = DeviceBinding::new(role, &device.id);
        Self {
            ctx,
            device,
            binding,
        }
    }

    /// Device state at bind time
    pub(crate) fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub(crate) fn ctx(&self) -> &BindContext {
        self.ctx
    }

    pub(crate) fn role(&self) -> Role {
        self.binding.role
    }

    pub(crate) fn timers(&self) -> TimerSet {
        self.binding.timers.clone()
    }

    /// Add (or reuse) a service and claim it
    pub(crate) fn service(&mut self, key: ServiceKey) -> ServiceKey {
        self.ctx
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_service(&key);
        self.binding.services.insert(key.clone());
        key
    }

    /// The role's own service
    pub(crate) fn primary_service(&mut self) -> ServiceKey {
        let role = self.binding.role;
        let key = match role.service_subtype() {
            Some(subtype) => ServiceKey::with_subtype(role.service_type(), subtype),
            None => ServiceKey::primary(role.service_type()),
        };
        self.service(key)
    }

    /// Register a characteristic, refreshing it when `watched` attributes change
    pub(crate) fn characteristic(
        &mut self,
        key: &ServiceKey,
        spec: CharacteristicSpec,
        watched: &[&'static str],
    ) {
        let characteristic = spec.characteristic;
        let read = spec.on_get.clone();
        self.ctx
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_characteristic(key, spec);
        self.binding
            .characteristics
            .insert((key.clone(), characteristic));

        let Some(read) = read else {
            return;
        };
        // Seed the cached value outside the accessory lock
        if let Some(value) = read() {
            self.ctx
                .services
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update_value(key, characteristic, value);
        }
        if !watched.is_empty() {
            self.binding.watches.push(Watch {
                service: key.clone(),
                characteristic,
                attributes: watched.to_vec(),
                read,
            });
        }
    }

    /// Read-only characteristic mirroring one attribute
    pub(crate) fn read(&mut self, key: &ServiceKey, characteristic: CharacteristicType, attribute: &'static str) {
        let spec = CharacteristicSpec::new(characteristic)
            .on_get(self.attribute_reader(attribute, characteristic));
        self.characteristic(key, spec, &[attribute]);
    }

    /// Read-only characteristic with published constraints
    pub(crate) fn read_with_props(
        &mut self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
        attribute: &'static str,
        props: CharacteristicProps,
    ) {
        let spec = CharacteristicSpec::new(characteristic)
            .props(props)
            .on_get(self.attribute_reader(attribute, characteristic));
        self.characteristic(key, spec, &[attribute]);
    }

    /// Writable characteristic mirroring one attribute
    pub(crate) fn write(
        &mut self,
        key: &ServiceKey,
        characteristic: CharacteristicType,
        attribute: &'static str,
        props: Option<CharacteristicProps>,
    ) {
        let mut spec = CharacteristicSpec::new(characteristic)
            .on_get(self.attribute_reader(attribute, characteristic))
            .on_set(self.command_writer(attribute));
        spec.props = props;
        self.characteristic(key, spec, &[attribute]);
    }

    /// Characteristic with a fixed value
    pub(crate) fn constant(&mut self, key: &ServiceKey, characteristic: CharacteristicType, value: PlatformValue) {
        let spec = CharacteristicSpec::new(characteristic).on_get(Arc::new(move || Some(value.clone())));
        self.characteristic(key, spec, &[]);
    }

    /// Get handler reading an attribute through the transformer
    pub(crate) fn attribute_reader(
        &self,
        attribute: &'static str,
        characteristic: CharacteristicType,
    ) -> GetHandler {
        let device = self.ctx.device.clone();
        let options = self.ctx.options.clone();
        Arc::new(move || {
            let opts = *options.read().unwrap_or_else(PoisonError::into_inner);
            let device = device.read().unwrap_or_else(PoisonError::into_inner);
            transform::to_platform_value(
                attribute,
                device.attribute(attribute)?,
                Some(characteristic),
                &opts,
            )
        })
    }

    /// Set handler turning a write into a hub command
    pub(crate) fn command_writer(&self, attribute: &'static str) -> SetHandler {
        let sink = self.ctx.sink.clone();
        let options = self.ctx.options.clone();
        let device_id = self.device.id.clone();
        Arc::new(move |value: PlatformValue| {
            let opts = *options.read().unwrap_or_else(PoisonError::into_inner);
            match transform::to_hub_command(attribute, &value, &opts) {
                Some(command) => sink.submit(CommandRequest::from_hub_command(&device_id, command)),
                None => debug!(
                    "Write of {} to {} on device {} maps to no command",
                    value, attribute, device_id
                ),
            }
        })
    }

    /// Set handler sending a fixed command
    pub(crate) fn fixed_command(&self, command: &'static str) -> SetHandler {
        let sink = self.ctx.sink.clone();
        let device_id = self.device.id.clone();
        Arc::new(move |_value: PlatformValue| {
            sink.submit(CommandRequest::new(device_id.clone(), command));
        })
    }

    fn finish(self) -> DeviceBinding {
        self.binding
    }
}

/// Bind one role of a device
pub fn bind(role: Role, ctx: &BindContext) -> DeviceBinding {
    let mut binder = Binder::new(role, ctx);
    match role {
        Role::WindowCovering => access::bind_window_covering(&mut binder),
        Role::Light => lighting::bind_light(&mut binder),
        Role::AirPurifier => climate::bind_air_purifier(&mut binder),
        Role::GarageDoor => access::bind_garage_door(&mut binder),
        Role::Lock => access::bind_lock(&mut binder),
        Role::Valve => access::bind_valve(&mut binder),
        Role::Fan => lighting::bind_fan(&mut binder),
        Role::Speaker => media::bind_speaker(&mut binder),
        Role::VirtualMode => switches::bind_virtual_mode(&mut binder),
        Role::VirtualPiston => switches::bind_virtual_piston(&mut binder),
        Role::Button => button::bind_button(&mut binder),
        Role::MotionSensor
        | Role::PresenceSensor
        | Role::TemperatureSensor
        | Role::HumiditySensor
        | Role::IlluminanceSensor
        | Role::ContactSensor
        | Role::WaterSensor
        | Role::SmokeDetector
        | Role::CarbonMonoxide
        | Role::CarbonDioxide
        | Role::AccelerationSensor => sensors::bind_sensor(&mut binder),
        Role::Thermostat => climate::bind_thermostat(&mut binder),
        Role::AlarmSystem => access::bind_alarm_system(&mut binder),
        Role::FilterMaintenance => climate::bind_filter_maintenance(&mut binder),
        Role::Outlet => switches::bind_outlet(&mut binder),
        Role::SwitchDevice => switches::bind_switch(&mut binder),
        Role::Battery => sensors::bind_battery(&mut binder),
    }
    binder.finish()
}

/// Fill the AccessoryInformation service from the device descriptor
pub fn apply_accessory_information(services: &SharedServices, device: &DeviceDescriptor) {
    let key = ServiceKey::primary(ServiceType::AccessoryInformation);
    let fields = [
        (CharacteristicType::Name, device.label.clone()),
        (
            CharacteristicType::Manufacturer,
            device.manufacturer.clone().unwrap_or_else(|| "Unknown".to_string()),
        ),
        (
            CharacteristicType::Model,
            device.model.clone().unwrap_or_else(|| "Unknown".to_string()),
        ),
        (CharacteristicType::SerialNumber, device.id.clone()),
        (
            CharacteristicType::FirmwareRevision,
            device.firmware_version.clone().unwrap_or_else(|| "1.0.0".to_string()),
        ),
    ];

    let mut guard = services.lock().unwrap_or_else(PoisonError::into_inner);
    guard.add_service(&key);
    for (characteristic, value) in fields {
        guard.add_characteristic(&key, CharacteristicSpec::new(characteristic));
        guard.update_value(&key, characteristic, PlatformValue::String(value));
    }
}

/// Remove services and characteristics no binding owns
///
/// AccessoryInformation is never touched. Returns the number of services and
/// characteristics removed.
pub fn sweep_stale(services: &SharedServices, bindings: &[DeviceBinding]) -> usize {
    let owned_services: BTreeSet<&ServiceKey> =
        bindings.iter().flat_map(|b| b.services.iter()).collect();

    let mut guard = services.lock().unwrap_or_else(PoisonError::into_inner);
    let mut removed = 0;
    for key in guard.services() {
        if key.service_type == ServiceType::AccessoryInformation {
            continue;
        }
        if !owned_services.contains(&key) {
            debug!("Removing stale service {}", key);
            guard.remove_service(&key);
            removed += 1;
            continue;
        }
        for characteristic in guard.characteristics(&key) {
            if !bindings.iter().any(|b| b.owns(&key, characteristic)) {
                debug!("Removing stale characteristic {} from {}", characteristic, key);
                guard.remove_characteristic(&key, characteristic);
                removed += 1;
            }
        }
    }
    removed
}

/// Bind every matched role of a device and sweep what is left over
pub fn bind_device(ctx: &BindContext, classification: &Classification) -> Vec<DeviceBinding> {
    let device = ctx.snapshot();
    let span = device_span(&device.id, &device.label);
    let _enter = span.enter();

    apply_accessory_information(&ctx.services, &device);
    let bindings: Vec<DeviceBinding> = classification
        .matched
        .iter()
        .map(|m| bind(m.role, ctx))
        .collect();

    let removed = sweep_stale(&ctx.services, &bindings);
    info!(
        "Bound device {} ({}) as {:?}, removed {} stale entries",
        device.id,
        device.label,
        classification.roles(),
        removed
    );
    bindings
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::platform::MemoryAccessory;

    /// Sink recording every submitted command
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) requests: Mutex<Vec<CommandRequest>>,
    }

    impl RecordingSink {
        pub(crate) fn taken(&self) -> Vec<CommandRequest> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }
    }

    impl CommandSink for RecordingSink {
        fn submit(&self, request: CommandRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    pub(crate) fn context(device: DeviceDescriptor) -> (BindContext, Arc<RecordingSink>) {
        context_with(device, TransformOptions::default())
    }

    pub(crate) fn context_with(
        device: DeviceDescriptor,
        options: TransformOptions,
    ) -> (BindContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let services = MemoryAccessory::new(device.id.clone(), device.label.clone()).into_shared();
        let ctx = BindContext {
            device: device.into_shared(),
            services,
            sink: sink.clone(),
            options: Arc::new(RwLock::new(options)),
        };
        (ctx, sink)
    }

    /// Store a new attribute value and notify a binding, like the update pipeline does
    pub(crate) fn push(ctx: &BindContext, binding: &DeviceBinding, attribute: &str, raw: Value) -> bool {
        ctx.device
            .write()
            .unwrap()
            .set_attribute(attribute, raw.clone());
        binding.on_attribute_change(&ctx.services, attribute, &raw, None)
    }

    pub(crate) fn value(
        ctx: &BindContext,
        key: &ServiceKey,
        characteristic: CharacteristicType,
    ) -> Option<PlatformValue> {
        ctx.services.lock().unwrap().value(key, characteristic)
    }
}
