/*!
 * Device registry.
 *
 * In-memory cache of the devices the bridge exposes, keyed by hub device id.
 * Each entry owns the device state, the accessory it is exposed as and the
 * bindings wiring the two together. A refresh computes a `RegistryDiff`
 * against the freshly fetched device list and applies it entry by entry.
 */
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::bindings::DeviceBinding;
use crate::classifier::{Classification, Role};
use crate::device::{DeviceDescriptor, DeviceError, Result, SharedDevice};
use crate::platform::SharedServices;

/// One exposed device
pub struct DeviceEntry {
    /// Current device state
    pub device: SharedDevice,
    /// Accessory the device is exposed as
    pub accessory: SharedServices,
    /// Roles the device was last classified as
    pub classification: Classification,
    /// Bindings for the matched roles
    pub bindings: Vec<DeviceBinding>,
}

impl DeviceEntry {
    /// Create an entry without bindings
    pub fn new(device: SharedDevice, accessory: SharedServices) -> Self {
        Self {
            device,
            accessory,
            classification: Classification::default(),
            bindings: Vec::new(),
        }
    }

    /// Matched roles
    pub fn roles(&self) -> Vec<Role> {
        self.classification.roles()
    }

    /// Replace the bindings, aborting the timers of the old ones
    pub fn set_bindings(&mut self, classification: Classification, bindings: Vec<DeviceBinding>) {
        self.classification = classification;
        self.bindings = bindings;
    }
}

impl fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("roles", &self.roles())
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Set difference between the registry and a fetched device list
#[derive(Debug, Default)]
pub struct RegistryDiff {
    /// Devices the registry does not know yet
    pub to_add: Vec<DeviceDescriptor>,
    /// Devices present on both sides
    pub to_update: Vec<DeviceDescriptor>,
    /// Registered devices missing from the list
    pub to_remove: Vec<String>,
}

impl RegistryDiff {
    /// Whether the diff changes nothing but device state
    pub fn is_structural_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Device registry
#[derive(Default)]
pub struct DeviceRegistry {
    entries: RwLock<HashMap<String, DeviceEntry>>,
}

/// Registry shared between the bridge and the update pipeline
pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the registry with a freshly fetched device list
    ///
    /// Duplicate ids in the list keep their first occurrence.
    pub fn diff(&self, current: Vec<DeviceDescriptor>) -> Result<RegistryDiff> {
        let entries = self.entries.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })?;

        let mut diff = RegistryDiff::default();
        let mut seen = HashSet::new();
        for device in current {
            if !seen.insert(device.id.clone()) {
                debug!("Ignoring duplicate device {} in device list", device.id);
                continue;
            }
            if entries.contains_key(&device.id) {
                diff.to_update.push(device);
            } else {
                diff.to_add.push(device);
            }
        }
        diff.to_remove = entries
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        diff.to_remove.sort();
        Ok(diff)
    }

    /// Register a new entry
    pub fn add(&self, entry: DeviceEntry) -> Result<()> {
        let id = entry.device.read().unwrap_or_else(PoisonError::into_inner).id.clone();
        let mut entries = self.entries.write().map_err(|_| {
            DeviceError::Other("Failed to acquire write lock on device registry".to_string())
        })?;

        if entries.contains_key(&id) {
            return Err(DeviceError::AlreadyRegistered(id));
        }
        debug!("Registered device {}", id);
        entries.insert(id, entry);
        Ok(())
    }

    /// Replace the state of a registered device
    ///
    /// The shared handle is kept so existing handlers see the new state.
    pub fn update(&self, device: DeviceDescriptor) -> Result<SharedDevice> {
        let entries = self.entries.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })?;

        let entry = entries
            .get(&device.id)
            .ok_or_else(|| DeviceError::UnknownDevice(device.id.clone()))?;
        let shared = entry.device.clone();
        *shared.write().unwrap_or_else(PoisonError::into_inner) = device;
        Ok(shared)
    }

    /// Replace the bindings of a registered device
    pub fn rebind(
        &self,
        id: &str,
        classification: Classification,
        bindings: Vec<DeviceBinding>,
    ) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| {
            DeviceError::Other("Failed to acquire write lock on device registry".to_string())
        })?;

        let entry = entries
            .get_mut(id)
            .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
        entry.set_bindings(classification, bindings);
        Ok(())
    }

    /// Remove a device, returning its entry
    pub fn remove(&self, id: &str) -> Result<DeviceEntry> {
        let mut entries = self.entries.write().map_err(|_| {
            DeviceError::Other("Failed to acquire write lock on device registry".to_string())
        })?;

        let entry = entries
            .remove(id)
            .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
        debug!("Unregistered device {}", id);
        Ok(entry)
    }

    /// Run a closure against one entry
    pub fn with_entry<R>(&self, id: &str, f: impl FnOnce(&DeviceEntry) -> R) -> Result<R> {
        let entries = self.entries.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })?;

        entries
            .get(id)
            .map(f)
            .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))
    }

    /// Shared state of one device
    pub fn device(&self, id: &str) -> Result<SharedDevice> {
        self.with_entry(id, |entry| entry.device.clone())
    }

    /// Accessory of one device
    pub fn accessory(&self, id: &str) -> Result<SharedServices> {
        self.with_entry(id, |entry| entry.accessory.clone())
    }

    /// Registered device ids, sorted
    pub fn ids(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })?;

        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of registered devices
    pub fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a device is registered
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Wrap the registry for sharing
    pub fn into_shared(self) -> SharedDeviceRegistry {
        Arc::new(self)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.count())
            .finish()
    }
}
