/*!
 * Prelude module for hubbridge core.
 *
 * Re-exports the types and helpers most modules of the bridge need.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{normalize_name, Value};

// Re-export config types
pub use crate::config::{BridgeConfig, ConfigBuilder, SharedConfig, TemperatureUnit};

// Re-export utility functions
pub use crate::utils::{backoff_delay, spawn_and_log};

// Re-export logging macros
pub use crate::log_with_fields;
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
