/*!
 * Inbound attribute updates.
 *
 * The hub posts one event per attribute change. `AttributeUpdatePipeline`
 * stores the new value in the device state and lets every interested binding
 * refresh its characteristics. `UpdateQueue` puts a bounded channel and a
 * single worker in front of it, so events are applied in arrival order and a
 * flood of events is shed instead of piling up.
 */
use std::sync::{Arc, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use hubbridge_core::types::Value;
use hubbridge_devices::SharedDeviceRegistry;

/// One attribute change reported by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Device id
    #[serde(rename = "change_device")]
    pub device_id: String,
    /// Attribute name
    #[serde(rename = "change_attribute")]
    pub attribute: String,
    /// New value
    #[serde(rename = "change_value", default = "null")]
    pub value: Value,
    /// Extra event data (button number, etc.)
    #[serde(rename = "change_data", default)]
    pub data: Option<Value>,
    /// Event time as reported by the hub
    #[serde(rename = "change_date", default)]
    pub date: Option<String>,
}

fn null() -> Value {
    Value::Null
}

impl UpdateEvent {
    /// Create an event without extra data
    pub fn new(device_id: impl Into<String>, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            device_id: device_id.into(),
            attribute: attribute.into(),
            value: value.into(),
            data: None,
            date: None,
        }
    }
}

/// Applies attribute updates to registered devices
#[derive(Debug, Clone)]
pub struct AttributeUpdatePipeline {
    registry: SharedDeviceRegistry,
}

impl AttributeUpdatePipeline {
    /// Create a pipeline over a registry
    pub fn new(registry: SharedDeviceRegistry) -> Self {
        Self { registry }
    }

    /// Apply one attribute change
    ///
    /// Returns false when the device is unknown or no binding cares about
    /// the attribute. The value is stored either way for known devices.
    pub fn apply(&self, device_id: &str, attribute: &str, value: Value, meta: Option<&Value>) -> bool {
        let applied = self.registry.with_entry(device_id, |entry| {
            {
                let mut device = entry.device.write().unwrap_or_else(PoisonError::into_inner);
                trace!("Device {} {} = {}", device_id, attribute, value);
                device.set_attribute(attribute, value.clone());
            }

            let mut handled = false;
            for binding in &entry.bindings {
                handled |= binding.on_attribute_change(&entry.accessory, attribute, &value, meta);
            }
            handled
        });

        match applied {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    "No binding of device {} is interested in {}={}",
                    device_id, attribute, value
                );
                false
            }
            Err(e) => {
                warn!("Ignoring update {}={}: {}", attribute, value, e);
                false
            }
        }
    }

    /// Apply an event
    pub fn apply_event(&self, event: &UpdateEvent) -> bool {
        self.apply(
            &event.device_id,
            &event.attribute,
            event.value.clone(),
            event.data.as_ref(),
        )
    }
}

/// Outcome of handing an event to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueueOutcome {
    /// The event will be applied
    Queued,
    /// The queue was full or closed and the event was dropped
    Failed,
}

/// Bounded queue with a worker applying events in order
#[derive(Debug)]
pub struct UpdateQueue {
    sender: mpsc::Sender<UpdateEvent>,
    worker: JoinHandle<()>,
}

impl UpdateQueue {
    /// Start the worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(pipeline: Arc<AttributeUpdatePipeline>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<UpdateEvent>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                pipeline.apply_event(&event);
            }
            debug!("Update queue closed");
        });
        Self { sender, worker }
    }

    /// Queue an event without waiting
    pub fn try_enqueue(&self, event: UpdateEvent) -> EnqueueOutcome {
        match self.sender.try_send(event) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Update queue full, dropping {}={} for device {}",
                    event.attribute, event.value, event.device_id
                );
                EnqueueOutcome::Failed
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!("Update queue closed, dropping update for device {}", event.device_id);
                EnqueueOutcome::Failed
            }
        }
    }

    /// Free slots in the queue
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }

    /// Stop the worker, dropping queued events
    pub fn stop(self) {
        self.worker.abort();
    }
}
