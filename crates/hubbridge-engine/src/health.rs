/*!
 * Per-endpoint failure tracking.
 *
 * A failure-threshold circuit breaker: once an endpoint has failed
 * `threshold` times in a row, requests to it are refused without touching the
 * network until `reset_timeout` has passed since the last failure. The next
 * request after that is let through and the counter starts over.
 */
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{TransportError, TransportResult};

/// A health table shared by everything calling the hub
pub type SharedHealth = Arc<HealthTable>;

/// Failure history of one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointHealth {
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// First failure of the current run
    pub failure_window_start: Option<Instant>,
    /// Most recent failure
    pub last_failure: Option<Instant>,
}

impl EndpointHealth {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Exported view of an endpoint's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    /// Route name
    pub endpoint: String,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Whether requests are currently refused
    pub open: bool,
}

/// Health of every endpoint the bridge calls
#[derive(Debug)]
pub struct HealthTable {
    threshold: u32,
    reset_timeout: Duration,
    endpoints: Mutex<HashMap<String, EndpointHealth>>,
}

impl HealthTable {
    /// Create a table with the given breaker settings
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset_timeout,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request to the endpoint may go out
    ///
    /// An endpoint whose reset timeout has passed is closed again here, so
    /// exactly the next request is a real attempt.
    pub fn allow(&self, endpoint: &str) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(health) = endpoints.get_mut(endpoint) else {
            return true;
        };
        if health.consecutive_failures < self.threshold {
            return true;
        }
        let cooled_down = health
            .last_failure
            .map_or(true, |last| last.elapsed() >= self.reset_timeout);
        if cooled_down {
            info!(
                "Endpoint {} cooled down after {} failures, trying again",
                endpoint, health.consecutive_failures
            );
            health.reset();
        }
        cooled_down
    }

    /// Record a successful request
    pub fn record_success(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(health) = endpoints.get_mut(endpoint) {
            health.reset();
        }
    }

    /// Record a failed request
    pub fn record_failure(&self, endpoint: &str) {
        let now = Instant::now();
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let health = endpoints.entry(endpoint.to_string()).or_default();
        health.consecutive_failures += 1;
        health.failure_window_start.get_or_insert(now);
        health.last_failure = Some(now);
        if health.consecutive_failures == self.threshold {
            warn!(
                "Endpoint {} failed {} times in a row, refusing requests for {:?}",
                endpoint, health.consecutive_failures, self.reset_timeout
            );
        }
    }

    /// Run one request through the breaker of `endpoint`
    ///
    /// Refused with `CircuitOpen` while the endpoint is open. A timeout or
    /// another transient error counts as a failure. A rejection from the hub
    /// is not counted either way.
    pub async fn guarded<T, F>(&self, endpoint: &str, timeout: Duration, request: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        if !self.allow(endpoint) {
            return Err(TransportError::CircuitOpen(endpoint.to_string()));
        }

        let result = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!("{} after {:?}", endpoint, timeout))),
        };
        match &result {
            Ok(_) => self.record_success(endpoint),
            Err(e) if e.is_transient() => self.record_failure(endpoint),
            // The hub answered, it is reachable
            Err(_) => {}
        }
        result
    }

    /// Current health of one endpoint
    pub fn get(&self, endpoint: &str) -> EndpointHealth {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .copied()
            .unwrap_or_default()
    }

    /// Health of every endpoint that has failed at least once, by name
    pub fn report(&self) -> Vec<EndpointReport> {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report: Vec<EndpointReport> = endpoints
            .iter()
            .map(|(name, health)| EndpointReport {
                endpoint: name.clone(),
                consecutive_failures: health.consecutive_failures,
                open: health.consecutive_failures >= self.threshold
                    && health
                        .last_failure
                        .map_or(false, |last| last.elapsed() < self.reset_timeout),
            })
            .collect();
        report.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        report
    }
}
