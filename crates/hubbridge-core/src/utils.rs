/*!
 * Utility functions and helpers for hubbridge.
 *
 * Retry backoff arithmetic and background task helpers shared by the
 * dispatcher and the refresh loops.
 */
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Delay before retry number `attempt` (1-based) using doubling backoff
///
/// The first retry waits `base`, each later one twice the previous, never
/// more than `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map(|d| d.min(cap))
        .unwrap_or(cap)
}

/// Create a task that runs in the background and logs any errors
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}
