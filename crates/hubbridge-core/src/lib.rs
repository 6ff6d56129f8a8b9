/*!
 * hubbridge Core
 *
 * This crate provides the shared foundation of the bridge: configuration,
 * error types, logging setup, loosely typed hub values and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use serde;
    pub use serde_json;
    pub use tokio;
    pub use tracing;
}

/// hubbridge core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("hubbridge core {} initialized", VERSION);
    Ok(())
}
