/*!
 * Outbound command dispatch.
 *
 * Every command a platform write produces ends up here. Value-setting
 * commands are debounced per `(device, command)` with a trailing timer, so a
 * dragged slider sends only its final position. Ready jobs are coalesced into
 * batched requests when batching is on, and every request goes through the
 * retry loop and the per-endpoint breaker.
 *
 * Callers get a `bool`: the dispatcher logs failures and never returns an
 * error. A caller whose job was superseded by a newer one for the same key
 * resolves with the outcome of the job that replaced it.
 */
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use hubbridge_core::config::DispatcherConfig;
use hubbridge_core::types::Value;
use hubbridge_core::utils::backoff_delay;
use hubbridge_devices::{CommandRequest, CommandSink};

use crate::error::{TransportError, TransportResult};
use crate::health::{EndpointReport, HealthTable, SharedHealth};
use crate::transport::{routes, BatchCommand, HubTransport};

/// A command waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct CommandJob {
    /// Target device
    pub device_id: String,
    /// Command name
    pub command: String,
    /// Positional arguments
    pub params: Vec<Value>,
    /// When the job entered the dispatcher
    pub enqueued_at: Instant,
}

impl CommandJob {
    /// Create a job without arguments
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command: command.into(),
            params: Vec::new(),
            enqueued_at: Instant::now(),
        }
    }

    /// Add an argument
    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    fn to_batch_command(&self) -> BatchCommand {
        BatchCommand {
            device_id: self.device_id.clone(),
            command: self.command.clone(),
            params: self.params.clone(),
        }
    }
}

impl From<CommandRequest> for CommandJob {
    fn from(request: CommandRequest) -> Self {
        Self {
            device_id: request.device_id,
            command: request.command,
            params: request.params,
            enqueued_at: Instant::now(),
        }
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Commands the hub accepted
    pub sent: u64,
    /// Commands given up on
    pub failed: u64,
    /// Jobs replaced by a newer one before they fired
    pub debounced: u64,
    /// Commands delivered inside a batched request
    pub batched: u64,
    /// Requests refused by the breaker
    pub short_circuited: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    debounced: AtomicU64,
    batched: AtomicU64,
    short_circuited: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

type JobKey = (String, String);
type Waiter = oneshot::Sender<bool>;

struct Pending {
    generation: u64,
    job: CommandJob,
    timer: JoinHandle<()>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct Batch {
    generation: u64,
    jobs: Vec<(CommandJob, Waiter)>,
    timer: Option<JoinHandle<()>>,
}

impl Batch {
    /// Take the collected jobs and start a new batch
    ///
    /// The timer handle is dropped, not aborted: the caller may be that timer.
    fn take(&mut self) -> Vec<(CommandJob, Waiter)> {
        self.generation += 1;
        self.timer = None;
        std::mem::take(&mut self.jobs)
    }
}

struct Inner {
    transport: Arc<dyn HubTransport>,
    config: DispatcherConfig,
    health: SharedHealth,
    pending: Mutex<HashMap<JobKey, Pending>>,
    batch: Mutex<Batch>,
    generations: AtomicU64,
    counters: Counters,
}

/// Sends commands to the hub
///
/// Cloning is cheap; clones share timers, counters and breaker state.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

impl CommandDispatcher {
    /// Create a dispatcher sending through `transport`
    pub fn new(transport: Arc<dyn HubTransport>, config: DispatcherConfig) -> Self {
        let health = Arc::new(HealthTable::new(config.failure_threshold, config.reset_timeout()));
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                health,
                pending: Mutex::new(HashMap::new()),
                batch: Mutex::new(Batch::default()),
                generations: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Send a command, resolving once it was delivered or given up on
    pub async fn send_command(&self, job: CommandJob) -> bool {
        let config = &self.inner.config;
        if config.is_debounced(&job.command) && !config.debounce().is_zero() {
            return self.debounce(job).await;
        }
        Inner::deliver(&self.inner, job).await
    }

    async fn debounce(&self, job: CommandJob) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let key = (job.device_id.clone(), job.command.clone());
            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

            let mut waiters = vec![tx];
            if let Some(previous) = pending.remove(&key) {
                previous.timer.abort();
                waiters.extend(previous.waiters);
                Counters::bump(&self.inner.counters.debounced, 1);
                debug!(
                    "Debounced {} for device {}, replacing {:?} with {:?}",
                    job.command, job.device_id, previous.job.params, job.params
                );
            }

            let inner = self.inner.clone();
            let timer_key = key.clone();
            let delay = self.inner.config.debounce();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Inner::fire(inner, timer_key, generation).await;
            });
            pending.insert(
                key,
                Pending {
                    generation,
                    job,
                    timer,
                    waiters,
                },
            );
        }
        rx.await.unwrap_or(false)
    }

    /// Drop every debounced and batched job that has not gone out yet
    ///
    /// Their callers resolve with `false`. Returns the number of jobs dropped.
    pub fn cancel_pending(&self) -> usize {
        let mut dropped = 0;
        let pending: Vec<Pending> = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p)
            .collect();
        for entry in pending {
            entry.timer.abort();
            dropped += 1;
            for waiter in entry.waiters {
                let _ = waiter.send(false);
            }
        }

        let jobs = {
            let mut batch = self.inner.batch.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            batch.take()
        };
        for (_, waiter) in jobs {
            dropped += 1;
            let _ = waiter.send(false);
        }
        dropped
    }

    /// Number of debounced jobs waiting for their timer
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatcherStats {
        let c = &self.inner.counters;
        DispatcherStats {
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            debounced: c.debounced.load(Ordering::Relaxed),
            batched: c.batched.load(Ordering::Relaxed),
            short_circuited: c.short_circuited.load(Ordering::Relaxed),
        }
    }

    /// Breaker state of every endpoint that has failed
    pub fn endpoint_health(&self) -> Vec<EndpointReport> {
        self.inner.health.report()
    }

    /// Breaker table, shared with the other hub calls
    pub fn health(&self) -> &SharedHealth {
        &self.inner.health
    }
}

impl Inner {
    /// Debounce timer expiry
    async fn fire(inner: Arc<Inner>, key: JobKey, generation: u64) {
        let entry = {
            let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(&key) {
                Some(p) if p.generation == generation => pending.remove(&key),
                // Replaced after this timer woke up
                _ => None,
            }
        };
        let Some(Pending { job, waiters, .. }) = entry else {
            return;
        };

        let delivered = Inner::deliver(&inner, job).await;
        for waiter in waiters {
            let _ = waiter.send(delivered);
        }
    }

    async fn deliver(inner: &Arc<Inner>, job: CommandJob) -> bool {
        if inner.config.batch_enabled && inner.config.batch_size > 1 {
            Inner::enqueue_batch(inner, job).await
        } else {
            inner.send_individually(&job).await
        }
    }

    async fn enqueue_batch(inner: &Arc<Inner>, job: CommandJob) -> bool {
        let (tx, rx) = oneshot::channel();
        let full = {
            let mut batch = inner.batch.lock().unwrap_or_else(PoisonError::into_inner);
            batch.jobs.push((job, tx));
            if batch.jobs.len() >= inner.config.batch_size {
                if let Some(timer) = batch.timer.take() {
                    timer.abort();
                }
                Some(batch.take())
            } else {
                if batch.timer.is_none() {
                    let generation = batch.generation;
                    let window = inner.config.batch_window();
                    let timer_inner = inner.clone();
                    batch.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        let jobs = {
                            let mut batch = timer_inner
                                .batch
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner);
                            if batch.generation != generation {
                                return;
                            }
                            batch.take()
                        };
                        timer_inner.flush(jobs).await;
                    }));
                }
                None
            }
        };

        if let Some(jobs) = full {
            let flush_inner = inner.clone();
            tokio::spawn(async move { flush_inner.flush(jobs).await });
        }
        rx.await.unwrap_or(false)
    }

    async fn flush(&self, jobs: Vec<(CommandJob, Waiter)>) {
        if jobs.len() <= 1 {
            for (job, waiter) in jobs {
                let delivered = self.send_individually(&job).await;
                let _ = waiter.send(delivered);
            }
            return;
        }

        let commands: Vec<BatchCommand> = jobs.iter().map(|(job, _)| job.to_batch_command()).collect();
        let count = commands.len() as u64;
        match self
            .call(routes::BATCH, self.transport.send_batch(&commands))
            .await
        {
            Ok(()) => {
                debug!("Sent {} commands in one batch", count);
                Counters::bump(&self.counters.sent, count);
                Counters::bump(&self.counters.batched, count);
                for (_, waiter) in jobs {
                    let _ = waiter.send(true);
                }
            }
            Err(e) => {
                warn!("Batch of {} commands failed ({}), sending individually", count, e);
                // Per-device order is kept, devices go out concurrently
                let mut by_device: BTreeMap<String, Vec<(CommandJob, Waiter)>> = BTreeMap::new();
                for (job, waiter) in jobs {
                    by_device
                        .entry(job.device_id.clone())
                        .or_default()
                        .push((job, waiter));
                }
                join_all(by_device.into_values().map(|group| async move {
                    for (job, waiter) in group {
                        let delivered = self.send_individually(&job).await;
                        let _ = waiter.send(delivered);
                    }
                }))
                .await;
            }
        }
    }

    /// One request through the breaker and the command timeout
    async fn call<F>(&self, endpoint: &str, request: F) -> TransportResult<()>
    where
        F: Future<Output = TransportResult<()>>,
    {
        let result = self
            .health
            .guarded(endpoint, self.config.command_timeout(), request)
            .await;
        if let Err(TransportError::CircuitOpen(_)) = &result {
            Counters::bump(&self.counters.short_circuited, 1);
        }
        result
    }

    async fn send_individually(&self, job: &CommandJob) -> bool {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let request = self
                .transport
                .send_command(&job.device_id, &job.command, &job.params);
            let err = match self.call(routes::COMMAND, request).await {
                Ok(()) => {
                    debug!(
                        "Sent {} {:?} to device {} after {:?}",
                        job.command,
                        job.params,
                        job.device_id,
                        job.enqueued_at.elapsed()
                    );
                    Counters::bump(&self.counters.sent, 1);
                    return true;
                }
                Err(e) => e,
            };

            if let TransportError::CircuitOpen(_) = err {
                error!(
                    "Dropping {} for device {}: hub command endpoint is short-circuited",
                    job.command, job.device_id
                );
            } else if !err.is_transient() {
                warn!(
                    "Hub rejected {} for device {}: {}",
                    job.command, job.device_id, err
                );
            } else if attempt < attempts {
                let delay = backoff_delay(
                    attempt,
                    self.config.backoff_base(),
                    self.config.backoff_cap(),
                );
                warn!(
                    "Sending {} to device {} failed ({}), attempt {}/{}, retrying in {:?}",
                    job.command, job.device_id, err, attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            } else {
                error!(
                    "Giving up on {} for device {} after {} attempts: {}",
                    job.command, job.device_id, attempts, err
                );
            }
            Counters::bump(&self.counters.failed, 1);
            return false;
        }
    }
}

impl CommandSink for CommandDispatcher {
    fn submit(&self, request: CommandRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime, dropping {} for device {}",
                request.command, request.device_id
            );
            return;
        };
        let dispatcher = self.clone();
        runtime.spawn(async move {
            dispatcher.send_command(CommandJob::from(request)).await;
        });
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("pending", &self.pending_count())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join;
    use test_log::test;

    use super::*;
    use crate::transport::testing::{Call, MockTransport};

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            batch_enabled: false,
            ..DispatcherConfig::default()
        }
    }

    fn dispatcher(config: DispatcherConfig) -> (CommandDispatcher, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        (CommandDispatcher::new(transport.clone(), config), transport)
    }

    fn server_error() -> TransportError {
        TransportError::Status {
            status: 500,
            body: String::new(),
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_debounce_sends_last_value_once() {
        let (dispatcher, transport) = dispatcher(config());
        let start = Instant::now();

        let mut callers = Vec::new();
        for level in [10, 20, 30] {
            let d = dispatcher.clone();
            callers.push(tokio::spawn(async move {
                d.send_command(CommandJob::new("1", "setLevel").with_param(level))
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(dispatcher.pending_count(), 1);
        for caller in callers {
            assert!(caller.await.unwrap());
        }

        assert_eq!(
            transport.calls(),
            vec![Call::command("1", "setLevel", vec![Value::from(30)])]
        );
        // Trailing edge: 600 ms after the last job
        assert!(start.elapsed() >= Duration::from_millis(800));
        let stats = dispatcher.stats();
        assert_eq!(stats.debounced, 2);
        assert_eq!(stats.sent, 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_debounce_is_keyed_by_device_and_command() {
        let (dispatcher, transport) = dispatcher(config());
        let (a, b) = join(
            dispatcher.send_command(CommandJob::new("1", "setLevel").with_param(10)),
            dispatcher.send_command(CommandJob::new("2", "setLevel").with_param(20)),
        )
        .await;
        assert!(a && b);
        assert_eq!(transport.calls().len(), 2);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_other_commands_fire_immediately() {
        let (dispatcher, transport) = dispatcher(config());
        let start = Instant::now();
        assert!(dispatcher.send_command(CommandJob::new("1", "on")).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.calls(), vec![Call::command("1", "on", vec![])]);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_batch_coalesces_jobs_in_window() {
        let (dispatcher, transport) = dispatcher(DispatcherConfig::default());
        let results = join_all(
            ["1", "2", "3"]
                .iter()
                .map(|id| dispatcher.send_command(CommandJob::new(*id, "on"))),
        )
        .await;
        assert_eq!(results, vec![true, true, true]);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let Call::Batch(commands) = &calls[0] else {
            panic!("expected a batch, got {:?}", calls);
        };
        let ids: Vec<&str> = commands.iter().map(|c| c.device_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(dispatcher.stats().batched, 3);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_full_batch_goes_out_without_waiting() {
        let (dispatcher, transport) = dispatcher(DispatcherConfig {
            batch_size: 2,
            batch_window_ms: 10_000,
            ..DispatcherConfig::default()
        });
        let start = Instant::now();
        let results = join_all(
            ["1", "2"]
                .iter()
                .map(|id| dispatcher.send_command(CommandJob::new(*id, "off"))),
        )
        .await;
        assert_eq!(results, vec![true, true]);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(&transport.calls()[..], [Call::Batch(c)] if c.len() == 2));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_single_job_in_window_is_sent_individually() {
        let (dispatcher, transport) = dispatcher(DispatcherConfig::default());
        assert!(dispatcher.send_command(CommandJob::new("9", "on")).await);
        assert_eq!(transport.calls(), vec![Call::command("9", "on", vec![])]);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_failed_batch_falls_back_to_individual_sends() {
        let (dispatcher, transport) = dispatcher(DispatcherConfig::default());
        transport.fail_batches(server_error());

        let results = join_all(vec![
            dispatcher.send_command(CommandJob::new("1", "on")),
            dispatcher.send_command(CommandJob::new("1", "setLevel").with_param(40)),
            dispatcher.send_command(CommandJob::new("2", "off")),
        ])
        .await;
        // setLevel is debounced and lands in a later batch of its own
        assert_eq!(results, vec![true, true, true]);

        let calls = transport.calls();
        assert!(matches!(&calls[0], Call::Batch(c) if c.len() == 2));
        assert!(calls.contains(&Call::command("1", "on", vec![])));
        assert!(calls.contains(&Call::command("2", "off", vec![])));
        assert_eq!(
            calls.last(),
            Some(&Call::command("1", "setLevel", vec![Value::from(40)]))
        );
        assert_eq!(dispatcher.stats().batched, 0);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_transient_failures_are_retried_with_backoff() {
        let (dispatcher, transport) = dispatcher(config());
        transport.fail_next(TransportError::timeout("slow"));
        transport.fail_next(server_error());
        let start = Instant::now();

        assert!(dispatcher.send_command(CommandJob::new("1", "on")).await);
        assert_eq!(transport.calls().len(), 3);
        // 1 s then 2 s
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_retry_budget_is_bounded() {
        let (dispatcher, transport) = dispatcher(config());
        transport.fail_always(Some(server_error()));

        assert!(!dispatcher.send_command(CommandJob::new("1", "on")).await);
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_permanent_failure_is_not_retried() {
        let (dispatcher, transport) = dispatcher(config());
        transport.fail_next(TransportError::Status {
            status: 404,
            body: "no such device".into(),
        });

        assert!(!dispatcher.send_command(CommandJob::new("77", "on")).await);
        assert_eq!(transport.calls().len(), 1);
        assert!(dispatcher.endpoint_health().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_breaker_short_circuits_until_reset() {
        let (dispatcher, transport) = dispatcher(DispatcherConfig {
            batch_enabled: false,
            max_attempts: 1,
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            ..DispatcherConfig::default()
        });
        transport.fail_always(Some(server_error()));

        for _ in 0..3 {
            assert!(!dispatcher.send_command(CommandJob::new("1", "on")).await);
        }
        assert_eq!(transport.take_calls().len(), 3);

        assert!(!dispatcher.send_command(CommandJob::new("1", "on")).await);
        assert!(transport.calls().is_empty());
        assert_eq!(dispatcher.stats().short_circuited, 1);
        assert!(dispatcher.endpoint_health()[0].open);

        tokio::time::advance(Duration::from_secs(60)).await;
        transport.fail_always(None);
        assert!(dispatcher.send_command(CommandJob::new("1", "on")).await);
        assert_eq!(transport.calls().len(), 1);
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_sink_submission_is_fire_and_forget() {
        let (dispatcher, transport) = dispatcher(config());
        dispatcher.submit(CommandRequest::new("5", "setVolume").with_param(50));
        assert!(transport.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            transport.calls(),
            vec![Call::command("5", "setVolume", vec![Value::from(50)])]
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn test_cancel_pending_resolves_callers() {
        let (dispatcher, transport) = dispatcher(config());
        let d = dispatcher.clone();
        let caller = tokio::spawn(async move {
            d.send_command(CommandJob::new("1", "setHue").with_param(20))
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.cancel_pending(), 1);
        assert!(!caller.await.unwrap());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_submit_without_runtime_is_dropped() {
        let (dispatcher, transport) = dispatcher(config());
        dispatcher.submit(CommandRequest::new("5", "on"));
        assert!(transport.calls().is_empty());
    }
}
