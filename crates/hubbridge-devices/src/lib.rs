/*!
 * hubbridge Devices
 *
 * This crate provides the hub device model and everything needed to expose it
 * on the smart-home platform: capability classification, value transforms,
 * the platform object model, per-role bindings and the device registry.
 */

#![warn(missing_docs)]

// Re-export core types
pub use hubbridge_core::prelude;

pub mod bindings;
pub mod classifier;
pub mod device;
pub mod platform;
pub mod registry;
pub mod transform;

pub use bindings::{bind_device, BindContext, CommandRequest, CommandSink, DeviceBinding};
pub use classifier::{classify, Classification, ClassifierConfig, Role};
pub use device::{DeviceDescriptor, DeviceError, DeviceStatus, SharedDevice};
pub use platform::{AccessoryHost, MemoryAccessory, MemoryHost, ServicesFacade, SharedServices};
pub use registry::{DeviceEntry, DeviceRegistry, RegistryDiff, SharedDeviceRegistry};
pub use transform::{HubCommand, TransformOptions};

/// hubbridge devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> Result<(), hubbridge_core::error::Error> {
    tracing::info!("hubbridge devices {} initialized", VERSION);
    Ok(())
}
