/*!
 * Hub device descriptors.
 *
 * A `DeviceDescriptor` is the bridge's snapshot of one hub device: identity,
 * declared capabilities, current attribute values and supported commands.
 * Descriptors are parsed from the hub's device list and replaced wholesale on
 * every refresh.
 */
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use hubbridge_core::{
    error::Error as CoreError,
    types::{normalize_name, Value},
};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The hub sent a device entry the bridge cannot interpret
    #[error("Invalid device descriptor: {0}")]
    InvalidDescriptor(String),

    /// No role matched the device
    #[error("Classification failed for device {0}: no role matched")]
    Classification(String),

    /// The device is not known to the registry
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// The device is already known to the registry
    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Serialization(err.to_string())
    }
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Activity status reported by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// The device is reachable
    Active,
    /// The hub marked the device inactive
    Inactive,
}

impl DeviceStatus {
    fn parse(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "inactive" || s == "offline" => DeviceStatus::Inactive,
            _ => DeviceStatus::Active,
        }
    }
}

/// A snapshot of one hub device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// The hub's id for the device
    pub id: String,
    /// Device name
    pub name: String,
    /// Display label, falls back to the name
    pub label: String,
    /// Manufacturer name
    pub manufacturer: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Firmware version
    pub firmware_version: Option<String>,
    /// Activity status
    pub status: DeviceStatus,
    /// Declared capabilities, normalised
    pub capabilities: BTreeSet<String>,
    /// Current attribute values
    pub attributes: HashMap<String, Value>,
    /// Supported commands
    pub commands: BTreeSet<String>,
    /// Capabilities hidden from classification, normalised
    pub excluded_capabilities: BTreeSet<String>,
}

/// A descriptor shared between the registry and the bindings of its device
pub type SharedDevice = Arc<RwLock<DeviceDescriptor>>;

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(alias = "deviceid")]
    id: JsonValue,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    basename: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, rename = "manufacturerName")]
    manufacturer_name: Option<String>,
    #[serde(default, rename = "modelName")]
    model_name: Option<String>,
    #[serde(default, rename = "firmwareVersion")]
    firmware_version: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    capabilities: JsonValue,
    #[serde(default)]
    attributes: HashMap<String, Value>,
    #[serde(default)]
    commands: JsonValue,
}

/// Collect names from either a list (of strings or `{name|command: ..}`
/// objects) or the keys of a map
fn collect_names(value: &JsonValue, object_keys: &[&str]) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Object(o) => object_keys
                    .iter()
                    .find_map(|k| o.get(*k).and_then(JsonValue::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        JsonValue::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn id_to_string(id: &JsonValue) -> Option<String> {
    match id {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl DeviceDescriptor {
    /// Create an empty descriptor with the given id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            label: name.clone(),
            name,
            manufacturer: None,
            model: None,
            firmware_version: None,
            status: DeviceStatus::Active,
            capabilities: BTreeSet::new(),
            attributes: HashMap::new(),
            commands: BTreeSet::new(),
            excluded_capabilities: BTreeSet::new(),
        }
    }

    /// Add a capability (builder style)
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(normalize_name(capability));
        self
    }

    /// Add an attribute value (builder style)
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Add a command (builder style)
    pub fn with_command(mut self, command: &str) -> Self {
        self.commands.insert(command.to_string());
        self
    }

    /// Parse one entry of the hub's `deviceList`
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let raw: RawDevice = serde_json::from_value(value.clone())?;
        let id = id_to_string(&raw.id)
            .ok_or_else(|| DeviceError::InvalidDescriptor(format!("missing device id in {}", value)))?;

        let name = raw
            .name
            .clone()
            .or(raw.basename.clone())
            .unwrap_or_else(|| format!("Device {}", id));
        let label = raw.label.clone().unwrap_or_else(|| name.clone());

        let capabilities = collect_names(&raw.capabilities, &["name", "capability"])
            .iter()
            .map(|c| normalize_name(c))
            .collect();
        let commands = collect_names(&raw.commands, &["command", "name"])
            .into_iter()
            .collect();

        Ok(Self {
            id,
            name,
            label,
            manufacturer: raw.manufacturer_name,
            model: raw.model_name,
            firmware_version: raw.firmware_version,
            status: DeviceStatus::parse(raw.status.as_deref()),
            capabilities,
            attributes: raw.attributes,
            commands,
            excluded_capabilities: BTreeSet::new(),
        })
    }

    /// Parse a whole device list, skipping entries that cannot be interpreted
    pub fn parse_list(list: &[JsonValue]) -> (Vec<Self>, Vec<DeviceError>) {
        let mut devices = Vec::with_capacity(list.len());
        let mut errors = Vec::new();
        for entry in list {
            match Self::from_json(entry) {
                Ok(device) => devices.push(device),
                Err(e) => errors.push(e),
            }
        }
        (devices, errors)
    }

    /// Hide capabilities from classification
    pub fn exclude_capabilities<S: AsRef<str>>(&mut self, capabilities: &[S]) {
        self.excluded_capabilities
            .extend(capabilities.iter().map(|c| normalize_name(c.as_ref())));
    }

    /// Check for a capability, ignoring case, whitespace and exclusions
    pub fn has_capability(&self, capability: &str) -> bool {
        let key = normalize_name(capability);
        self.capabilities.contains(&key) && !self.excluded_capabilities.contains(&key)
    }

    /// Check for any of the given capabilities
    pub fn has_any_capability(&self, capabilities: &[&str]) -> bool {
        capabilities.iter().any(|c| self.has_capability(c))
    }

    /// Check whether the device reports an attribute
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    /// Check whether the device supports a command
    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Current value of an attribute
    pub fn attribute(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Store a new attribute value, returning the previous one
    pub fn set_attribute(&mut self, attribute: &str, value: Value) -> Option<Value> {
        self.attributes.insert(attribute.to_string(), value)
    }

    /// Case-insensitive check of the label and name
    pub fn name_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.label.to_lowercase().contains(&needle) || self.name.to_lowercase().contains(&needle)
    }

    /// Whether the hub considers the device active
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    /// Wrap the descriptor for sharing with bindings
    pub fn into_shared(self) -> SharedDevice {
        Arc::new(RwLock::new(self))
    }
}
