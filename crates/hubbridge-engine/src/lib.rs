/*!
 * hubbridge Engine
 *
 * This crate talks to the hub and runs the bridge: the HTTP transport, the
 * command dispatcher with its debounce, batching, retry and circuit breaker,
 * the inbound attribute update pipeline, webhook handling and the refresh
 * and status loops.
 */

#![warn(missing_docs)]

// Re-export core types
pub use hubbridge_core::prelude;

// Re-export types from hubbridge_core for convenience
pub use hubbridge_core::types::Value;

pub mod bridge;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod transport;
pub mod webhook;

// Re-export main types for convenience
pub use bridge::{Bridge, Preferences, RefreshSummary};
pub use dispatcher::{CommandDispatcher, CommandJob, DispatcherStats};
pub use error::{Error, Result, TransportError, TransportResult};
pub use health::{EndpointHealth, EndpointReport, HealthTable, SharedHealth};
pub use pipeline::{AttributeUpdatePipeline, EnqueueOutcome, UpdateEvent, UpdateQueue};
pub use transport::{
    BatchCommand, DeviceListResponse, HttpHubClient, HubLocation, HubTimeouts, HubTransport,
    PluginStatus, UpdateRegistration,
};
pub use webhook::{EvtStatus, InboundRequest, InboundResponse, WebhookHandler};

/// hubbridge engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("hubbridge engine {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
