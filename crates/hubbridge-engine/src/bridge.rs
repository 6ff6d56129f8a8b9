/*!
 * Bridge orchestration.
 *
 * `Bridge` ties the pieces together: it pulls the device list from the hub,
 * reconciles it with the registry (classifying and binding new or changed
 * devices and dropping vanished ones), routes inbound updates to the update
 * pipeline and runs the periodic refresh and status loops.
 */
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument, Level};

use hubbridge_core::config::{BridgeConfig, TemperatureUnit};
use hubbridge_core::log_with_fields;
use hubbridge_core::logging::operation_span;
use hubbridge_core::utils::spawn_and_log;
use hubbridge_devices::bindings::SharedOptions;
use hubbridge_devices::classifier::classify_or_fail;
use hubbridge_devices::{
    bind_device, AccessoryHost, BindContext, ClassifierConfig, DeviceDescriptor, DeviceEntry,
    DeviceRegistry, MemoryHost, SharedDevice, SharedDeviceRegistry, SharedServices,
    TransformOptions,
};

use crate::dispatcher::CommandDispatcher;
use crate::error::Result;
use crate::health::SharedHealth;
use crate::pipeline::{AttributeUpdatePipeline, UpdateEvent, UpdateQueue};
use crate::transport::{routes, HttpHubClient, HubTransport, PluginStatus, UpdateRegistration};
use crate::webhook::EvtStatus;

/// What a refresh changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Newly exposed devices
    pub added: usize,
    /// Devices whose state was replaced
    pub updated: usize,
    /// Devices no longer exposed
    pub removed: usize,
    /// Devices that matched no role
    pub skipped: usize,
    /// Device list entries that could not be parsed
    pub parse_errors: usize,
}

/// Settings the hub can change at runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Snap levels near the ends of the range
    #[serde(default, alias = "roundLevels")]
    pub round_levels: Option<bool>,
    /// Treat switches named like fans as fans
    #[serde(default, alias = "considerFanByName")]
    pub consider_fan_by_name: Option<bool>,
    /// Treat switches named like lights as lights
    #[serde(default, alias = "considerLightByName")]
    pub consider_light_by_name: Option<bool>,
    /// Hub temperature unit
    #[serde(default, alias = "temperatureUnit", alias = "temperature_scale")]
    pub temperature_unit: Option<TemperatureUnit>,
}

/// The running bridge
pub struct Bridge {
    config: BridgeConfig,
    transport: Arc<dyn HubTransport>,
    host: Arc<dyn AccessoryHost>,
    registry: SharedDeviceRegistry,
    dispatcher: CommandDispatcher,
    pipeline: Arc<AttributeUpdatePipeline>,
    classifier: RwLock<ClassifierConfig>,
    options: SharedOptions,
    started_at: Instant,
    refresh_lock: tokio::sync::Mutex<()>,
    updates: Mutex<Option<UpdateQueue>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Create a bridge over a transport and an accessory host
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn HubTransport>,
        host: Arc<dyn AccessoryHost>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = DeviceRegistry::new().into_shared();
        let dispatcher = CommandDispatcher::new(transport.clone(), config.dispatcher.clone());
        let pipeline = Arc::new(AttributeUpdatePipeline::new(registry.clone()));
        let classifier = RwLock::new(ClassifierConfig::from(&config.classifier));
        let options = Arc::new(RwLock::new(TransformOptions::from(&config.transform)));

        Ok(Self {
            config,
            transport,
            host,
            registry,
            dispatcher,
            pipeline,
            classifier,
            options,
            started_at: Instant::now(),
            refresh_lock: tokio::sync::Mutex::new(()),
            updates: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Create a bridge talking HTTP to the configured hub, with in-memory accessories
    pub fn from_config(config: BridgeConfig) -> Result<Self> {
        let client = HttpHubClient::from_config(&config.hub, config.dispatcher.command_timeout())?;
        Self::new(config, Arc::new(client), Arc::new(MemoryHost::new()))
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Device registry
    pub fn registry(&self) -> &SharedDeviceRegistry {
        &self.registry
    }

    /// Command dispatcher
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Update pipeline
    pub fn pipeline(&self) -> &Arc<AttributeUpdatePipeline> {
        &self.pipeline
    }

    /// Current transform options
    pub fn transform_options(&self) -> TransformOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current classifier flags
    pub fn classifier_config(&self) -> ClassifierConfig {
        *self.classifier.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaker table shared by every hub call
    pub fn health(&self) -> &SharedHealth {
        self.dispatcher.health()
    }

    fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.config.hub.status_timeout_ms)
    }

    /// Time since the bridge was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fetch the device list and reconcile the registry with it
    pub async fn refresh_from_hub(&self) -> Result<RefreshSummary> {
        let _running = self.refresh_lock.lock().await;
        let span = operation_span("refresh", "bridge");

        let timeout = Duration::from_millis(self.config.hub.device_list_timeout_ms);
        let response = self
            .health()
            .guarded(routes::DEVICES, timeout, self.transport.fetch_devices())
            .instrument(span.clone())
            .await?;

        let _enter = span.enter();
        if let Some(scale) = response.location.and_then(|l| l.temperature_scale) {
            match TemperatureUnit::from_scale(&scale) {
                Some(unit) => self.set_temperature_unit(unit),
                None => warn!("Hub reported unknown temperature scale {:?}", scale),
            }
        }

        let (devices, errors) = DeviceDescriptor::parse_list(&response.device_list);
        for err in &errors {
            warn!("Skipping device list entry: {}", err);
        }
        let mut summary = self.apply_device_list(devices)?;
        summary.parse_errors = errors.len();
        info!(
            "Refresh done: {} added, {} updated, {} removed, {} skipped, {} unreadable",
            summary.added, summary.updated, summary.removed, summary.skipped, summary.parse_errors
        );
        Ok(summary)
    }

    /// Reconcile the registry with a device list
    ///
    /// Vanished devices are removed before new ones are added.
    pub fn apply_device_list(&self, devices: Vec<DeviceDescriptor>) -> Result<RefreshSummary> {
        let diff = self.registry.diff(devices)?;
        let mut summary = RefreshSummary::default();

        for id in &diff.to_remove {
            self.remove_device(id);
            summary.removed += 1;
        }
        for device in diff.to_add {
            if self.add_device(device) {
                summary.added += 1;
            } else {
                summary.skipped += 1;
            }
        }
        for device in diff.to_update {
            if self.update_device(device) {
                summary.updated += 1;
            } else {
                summary.removed += 1;
            }
        }
        Ok(summary)
    }

    fn apply_exclusions(&self, device: &mut DeviceDescriptor) {
        if let Some(excluded) = self.config.classifier.excluded_capabilities.get(&device.id) {
            debug!("Excluding {:?} from device {}", excluded, device.id);
            device.exclude_capabilities(excluded);
        }
    }

    fn bind_context(&self, device: SharedDevice, services: SharedServices) -> BindContext {
        BindContext {
            device,
            services,
            sink: Arc::new(self.dispatcher.clone()),
            options: self.options.clone(),
        }
    }

    fn add_device(&self, mut device: DeviceDescriptor) -> bool {
        self.apply_exclusions(&mut device);
        let classification = match classify_or_fail(&device, &self.classifier_config()) {
            Ok(classification) => classification,
            Err(e) => {
                error!("{}; {} ({}) is not exposed", e, device.id, device.label);
                return false;
            }
        };

        let id = device.id.clone();
        let accessory = self.host.create_accessory(&id, &device.label);
        let shared = device.into_shared();
        let bindings = bind_device(&self.bind_context(shared.clone(), accessory.clone()), &classification);

        let mut entry = DeviceEntry::new(shared, accessory);
        entry.set_bindings(classification, bindings);
        if let Err(e) = self.registry.add(entry) {
            error!("Could not register device {}: {}", id, e);
            return false;
        }
        log_with_fields!(Level::INFO, "device added", device_id = %id, devices = self.registry.count());
        true
    }

    fn update_device(&self, mut device: DeviceDescriptor) -> bool {
        self.apply_exclusions(&mut device);
        let id = device.id.clone();
        let classification = match classify_or_fail(&device, &self.classifier_config()) {
            Ok(classification) => classification,
            Err(e) => {
                error!("{}; removing {} ({})", e, id, device.label);
                self.remove_device(&id);
                return false;
            }
        };

        let bound = self
            .registry
            .update(device)
            .and_then(|shared| Ok((shared, self.registry.accessory(&id)?)))
            .and_then(|(shared, accessory)| {
                let bindings = bind_device(&self.bind_context(shared, accessory), &classification);
                self.registry.rebind(&id, classification, bindings)
            });
        if let Err(e) = bound {
            error!("Could not update device {}: {}", id, e);
            return false;
        }
        true
    }

    fn remove_device(&self, id: &str) {
        match self.registry.remove(id) {
            Ok(entry) => info!("Removed device {} ({:?})", id, entry.roles()),
            Err(e) => warn!("Could not remove device {}: {}", id, e),
        }
        self.host.remove_accessory(id);
    }

    fn set_temperature_unit(&self, unit: TemperatureUnit) {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        if options.temperature_unit != unit {
            info!("Hub temperature unit is now {}", unit.as_str());
            options.temperature_unit = unit;
        }
    }

    /// Apply preferences sent by the hub
    ///
    /// Returns true when a classifier flag changed, which needs a refresh to
    /// take effect.
    pub fn update_preferences(&self, prefs: &Preferences) -> bool {
        {
            let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(round_levels) = prefs.round_levels {
                options.round_levels = round_levels;
            }
        }
        if let Some(unit) = prefs.temperature_unit {
            self.set_temperature_unit(unit);
        }

        let mut classifier = self.classifier.write().unwrap_or_else(PoisonError::into_inner);
        let before = *classifier;
        if let Some(flag) = prefs.consider_fan_by_name {
            classifier.consider_fan_by_name = flag;
        }
        if let Some(flag) = prefs.consider_light_by_name {
            classifier.consider_light_by_name = flag;
        }
        info!("Preferences updated: {:?}", prefs);
        *classifier != before
    }

    /// Hand an inbound update to the queue, or apply it right away when the
    /// queue is not running
    pub fn submit_update(&self, event: UpdateEvent) -> EvtStatus {
        let updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        match updates.as_ref() {
            Some(queue) => queue.try_enqueue(event).into(),
            None => {
                drop(updates);
                if self.pipeline.apply_event(&event) {
                    EvtStatus::Ok
                } else {
                    EvtStatus::Failed
                }
            }
        }
    }

    /// Report the bridge's status to the hub
    pub async fn report_status(&self) -> Result<()> {
        let status = PluginStatus {
            has_update: false,
            new_version: None,
            version: self.config.general.app_version.clone(),
            acc_count: self.registry.count(),
            memory: None,
            uptime: self.uptime().as_secs(),
        };
        self.health()
            .guarded(routes::STATUS, self.status_timeout(), self.transport.report_status(&status))
            .await?;
        debug!("Reported status: {} accessories", status.acc_count);
        Ok(())
    }

    /// Tell the hub where to post attribute updates
    pub async fn register_for_updates(&self) -> Result<()> {
        let registration = UpdateRegistration {
            plugin_ip: self.config.general.direct_ip.clone(),
            plugin_port: self.config.general.direct_port,
            plugin_version: self.config.general.app_version.clone(),
        };
        self.health()
            .guarded(
                routes::REGISTER,
                self.status_timeout(),
                self.transport.register_for_updates(&registration),
            )
            .await?;
        info!(
            "Registered {}:{} for hub updates",
            registration.plugin_ip, registration.plugin_port
        );
        Ok(())
    }

    /// Start the update queue, run the first refresh and spawn the loops
    ///
    /// A failing first refresh is logged; the refresh loop tries again.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
            if updates.is_none() {
                *updates = Some(UpdateQueue::start(
                    self.pipeline.clone(),
                    self.config.updates.queue_capacity,
                ));
            }
        }

        let bridge = self.clone();
        let registration = spawn_and_log("register for updates", async move {
            bridge
                .register_for_updates()
                .await
                .context("registering with the hub")
        });
        self.track(registration);

        if let Err(e) = self.refresh_from_hub().await {
            error!("Initial device refresh failed: {}", e);
        }

        self.spawn_loop("device refresh", self.config.hub.refresh_interval(), |bridge| async move {
            bridge.refresh_from_hub().await.context("refreshing devices")?;
            Ok::<(), anyhow::Error>(())
        });
        self.spawn_loop("status report", self.config.hub.status_interval(), |bridge| async move {
            bridge.report_status().await.context("reporting status")
        });
        info!(
            "Bridge started with {} devices on {}",
            self.registry.count(),
            self.config.hub.base_url()
        );
        Ok(())
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, step: F)
    where
        F: Fn(Arc<Bridge>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let bridge: Weak<Bridge> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                if let Err(e) = step(bridge).await {
                    warn!("{} failed: {:#}", name, e);
                }
            }
            debug!("{} loop stopped", name);
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Stop the loops and the update queue and drop unsent commands
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        if let Some(queue) = self
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            queue.stop();
        }
        let dropped = self.dispatcher.cancel_pending();
        info!("Bridge stopped, {} unsent commands dropped", dropped);
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("devices", &self.registry.count())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use test_log::test;

    use super::*;
    use hubbridge_devices::platform::{
        write_characteristic, CharacteristicType, PlatformValue, ServiceKey, ServiceType,
    };
    use hubbridge_devices::Role;

    use crate::error::{Error, TransportError};
    use crate::transport::testing::{Call, MockTransport};
    use crate::transport::HubLocation;

    fn bridge_with(config: BridgeConfig) -> (Arc<Bridge>, Arc<MockTransport>, Arc<MemoryHost>) {
        let transport = Arc::new(MockTransport::default());
        let host = Arc::new(MemoryHost::new());
        let bridge = Bridge::new(config, transport.clone(), host.clone()).unwrap();
        (Arc::new(bridge), transport, host)
    }

    fn bridge() -> (Arc<Bridge>, Arc<MockTransport>, Arc<MemoryHost>) {
        bridge_with(BridgeConfig::default())
    }

    fn switch_json(id: &str, extra_caps: &[&str]) -> serde_json::Value {
        let mut caps = vec!["Switch"];
        caps.extend_from_slice(extra_caps);
        json!({
            "deviceid": id,
            "name": format!("Device {}", id),
            "capabilities": caps,
            "attributes": {"switch": "off", "level": 20},
            "commands": ["on", "off", "setLevel"]
        })
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_refresh_adds_devices_and_adopts_hub_scale() {
        let (bridge, transport, host) = bridge();
        transport.set_devices(
            vec![
                switch_json("1", &[]),
                switch_json("2", &["Switch Level", "LightBulb"]),
                json!({"deviceid": "3", "name": "Hub Variable", "capabilities": ["Variable"]}),
                json!({"name": "broken"}),
            ],
            Some(HubLocation {
                temperature_scale: Some("C".into()),
                ..HubLocation::default()
            }),
        );

        let summary = bridge.refresh_from_hub().await.unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                added: 2,
                skipped: 1,
                parse_errors: 1,
                ..RefreshSummary::default()
            }
        );
        assert_eq!(host.accessory_ids(), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(
            bridge.registry().with_entry("2", |e| e.roles()).unwrap(),
            vec![Role::Light]
        );
        assert_eq!(
            bridge.transform_options().temperature_unit,
            TemperatureUnit::Celsius
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_refresh_removes_vanished_and_rebinds_changed() {
        let (bridge, transport, host) = bridge();
        transport.set_devices(vec![switch_json("1", &[]), switch_json("2", &[])], None);
        bridge.refresh_from_hub().await.unwrap();

        // Device 1 became a dimmer, device 2 is gone
        transport.set_devices(vec![switch_json("1", &["Switch Level", "LightBulb"])], None);
        let summary = bridge.refresh_from_hub().await.unwrap();
        assert_eq!((summary.updated, summary.removed), (1, 1));
        assert_eq!(host.accessory_ids(), vec!["1".to_string()]);

        let accessory = host.accessory("1").unwrap();
        let services = accessory.lock().unwrap().services();
        assert!(services.contains(&ServiceKey::primary(ServiceType::Lightbulb)));
        assert!(!services.contains(&ServiceKey::primary(ServiceType::Switch)));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_excluded_capabilities_change_the_role() {
        let mut config = BridgeConfig::default();
        config.classifier.excluded_capabilities =
            HashMap::from([("2".to_string(), vec!["LightBulb".to_string(), "Switch Level".to_string()])]);
        let (bridge, _transport, _host) = bridge_with(config);

        let device = DeviceDescriptor::new("2", "Lamp")
            .with_capability("Switch")
            .with_capability("Switch Level")
            .with_capability("LightBulb");
        bridge.apply_device_list(vec![device]).unwrap();
        assert_eq!(
            bridge.registry().with_entry("2", |e| e.roles()).unwrap(),
            vec![Role::SwitchDevice]
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_platform_writes_reach_the_hub() {
        let (bridge, transport, host) = bridge();
        transport.set_devices(vec![switch_json("1", &["Switch Level", "LightBulb"])], None);
        bridge.refresh_from_hub().await.unwrap();
        transport.take_calls();

        let accessory = host.accessory("1").unwrap();
        let bulb = ServiceKey::primary(ServiceType::Lightbulb);
        write_characteristic(&accessory, &bulb, CharacteristicType::On, PlatformValue::Bool(true));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.calls(), vec![Call::command("1", "on", vec![])]);
        assert_eq!(bridge.dispatcher().stats().sent, 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_updates_apply_directly_before_start() {
        let (bridge, transport, host) = bridge();
        transport.set_devices(vec![switch_json("1", &[])], None);
        bridge.refresh_from_hub().await.unwrap();

        let status = bridge.submit_update(UpdateEvent::new("1", "switch", "on"));
        assert_eq!(status, EvtStatus::Ok);
        let accessory = host.accessory("1").unwrap();
        assert_eq!(
            accessory
                .lock()
                .unwrap()
                .value(&ServiceKey::primary(ServiceType::Switch), CharacteristicType::On),
            Some(PlatformValue::Bool(true))
        );
        assert_eq!(
            bridge.submit_update(UpdateEvent::new("99", "switch", "on")),
            EvtStatus::Failed
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_preferences() {
        let (bridge, _transport, _host) = bridge();
        let changed = bridge.update_preferences(&Preferences {
            round_levels: Some(false),
            temperature_unit: Some(TemperatureUnit::Celsius),
            ..Preferences::default()
        });
        assert!(!changed);
        let options = bridge.transform_options();
        assert!(!options.round_levels);
        assert_eq!(options.temperature_unit, TemperatureUnit::Celsius);

        assert!(bridge.update_preferences(&Preferences {
            consider_fan_by_name: Some(true),
            ..Preferences::default()
        }));
        assert!(bridge.classifier_config().consider_fan_by_name);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_status_and_registration_bodies() {
        let (bridge, transport, _host) = bridge();
        transport.set_devices(vec![switch_json("1", &[])], None);
        bridge.refresh_from_hub().await.unwrap();
        transport.take_calls();
        tokio::time::advance(Duration::from_secs(90)).await;

        tokio_test::assert_ok!(bridge.report_status().await);
        bridge.register_for_updates().await.unwrap();
        let calls = transport.calls();
        let Call::Status(status) = &calls[0] else {
            panic!("expected a status report, got {:?}", calls);
        };
        assert_eq!(status.acc_count, 1);
        assert_eq!(status.uptime, 90);
        assert!(!status.has_update);
        let Call::Register(registration) = &calls[1] else {
            panic!("expected a registration, got {:?}", calls);
        };
        assert_eq!(registration.plugin_ip, "127.0.0.1");
        assert_eq!(registration.plugin_port, 8000);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_start_runs_loops_until_shutdown() {
        let mut config = BridgeConfig::default();
        config.hub.refresh_seconds = 60;
        config.hub.status_seconds = 3600;
        let (bridge, transport, _host) = bridge_with(config);
        transport.set_devices(vec![switch_json("1", &[])], None);

        bridge.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let calls = transport.take_calls();
        assert!(calls.contains(&Call::Devices));
        assert!(calls.iter().any(|c| matches!(c, Call::Register(_))));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(transport.take_calls(), vec![Call::Devices]);

        // Queued once started
        assert_eq!(
            bridge.submit_update(UpdateEvent::new("1", "switch", "on")),
            EvtStatus::Queued
        );

        bridge.shutdown();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(transport.calls().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failed_refresh_is_reported() {
        let (bridge, transport, _host) = bridge();
        transport.fail_always(Some(TransportError::connection("refused")));
        tokio_test::assert_err!(bridge.refresh_from_hub().await);
        assert_eq!(bridge.registry().count(), 0);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failing_device_list_opens_the_breaker() {
        let mut config = BridgeConfig::default();
        config.dispatcher.failure_threshold = 2;
        config.dispatcher.reset_timeout_ms = 60_000;
        let (bridge, transport, _host) = bridge_with(config);
        transport.set_devices(vec![switch_json("1", &[])], None);
        transport.fail_always(Some(TransportError::connection("refused")));

        for _ in 0..2 {
            tokio_test::assert_err!(bridge.refresh_from_hub().await);
        }
        assert_eq!(transport.take_calls(), vec![Call::Devices, Call::Devices]);

        // Refused without reaching the hub
        let err = bridge.refresh_from_hub().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::CircuitOpen(_))), "{}", err);
        assert!(transport.calls().is_empty());
        assert!(bridge.dispatcher().endpoint_health()[0].open);

        // One real attempt once the reset window has passed
        tokio::time::advance(Duration::from_secs(61)).await;
        transport.fail_always(None);
        tokio_test::assert_ok!(bridge.refresh_from_hub().await);
        assert_eq!(transport.take_calls(), vec![Call::Devices]);
        assert_eq!(bridge.registry().count(), 1);
        assert_eq!(bridge.health().get(routes::DEVICES).consecutive_failures, 0);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_status_reports_share_the_breaker() {
        let mut config = BridgeConfig::default();
        config.dispatcher.failure_threshold = 1;
        let (bridge, transport, _host) = bridge_with(config);
        transport.fail_next(TransportError::timeout("no answer"));

        tokio_test::assert_err!(bridge.report_status().await);
        tokio_test::assert_err!(bridge.report_status().await);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(bridge.health().get(routes::STATUS).consecutive_failures, 1);

        // Other endpoints are unaffected
        tokio_test::assert_ok!(bridge.register_for_updates().await);
        assert_eq!(bridge.health().get(routes::REGISTER).consecutive_failures, 0);
    }
}
