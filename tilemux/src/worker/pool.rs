//! Concurrent worker pool.
//!
//! A [`ConcurrentWorkerPool`] owns a fixed-size set of worker channels
//! running one script bundle, multiplexes named services over them, and
//! layers request/response semantics onto the message-based transport:
//!
//! - Correlation by request id, never by send order (workers may answer in
//!   any order)
//! - Per-request timeout, independent of the pool-wide connection timeout
//! - Caller-supplied cancellation tokens
//! - Round-robin worker selection over ready workers
//! - Reference-counted consumer lifecycle with idempotent teardown
//!
//! # Architecture
//!
//! ```text
//! ServiceProxy ──► invoke_request ──► pending table ──► WorkerChannel
//!                       ▲                  │
//!                       │                  ▼
//!                  oneshot result ◄── router task ◄── WorkerEvent stream
//! ```
//!
//! One router task per worker drains that worker's event stream and resolves
//! pending entries. A closed event stream (worker crash) fails the worker
//! and rejects every request still routed to it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{WorkerChannel, WorkerLauncher, WorkerScript};
use super::error::WorkerSetError;
use super::protocol::{
    ConfigurationMessage, RequestId, ResponseStatus, ServiceRequest, WorkerEnvelope, WorkerEvent,
};

// =============================================================================
// Configuration
// =============================================================================

/// Default deadline for the initial worker handshake.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-request timeout, started at send time.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default worker count for tiler pools.
///
/// Decoder pools default to the machine's available parallelism instead;
/// the asymmetry is deliberate and mirrors long-standing behavior.
pub const DEFAULT_TILER_WORKER_COUNT: usize = 1;

/// Returns the automatic worker count used when a consumer does not specify
/// one: the machine's available parallelism.
pub fn auto_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for a worker pool.
#[derive(Clone, Debug)]
pub struct WorkerSetConfig {
    /// Script bundle every worker in the set runs.
    pub script: WorkerScript,

    /// Number of workers to spawn.
    pub worker_count: usize,

    /// Deadline for all workers to complete the readiness handshake.
    pub connection_timeout: Duration,

    /// Timeout applied to each individual request.
    pub request_timeout: Duration,
}

impl WorkerSetConfig {
    /// Creates a config with default timeouts and automatic worker count.
    pub fn new(script: WorkerScript) -> Self {
        Self {
            script,
            worker_count: auto_worker_count(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Worker state
// =============================================================================

/// Readiness of one worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Slot allocated, worker not yet launched.
    Initializing,
    /// Launched, waiting for the readiness handshake.
    Connecting,
    /// Handshake complete, accepting requests.
    Ready,
    /// Startup failed or the channel closed.
    Failed,
}

struct PendingRequest {
    tx: oneshot::Sender<Result<Value, WorkerSetError>>,
    worker: usize,
}

// =============================================================================
// Pool
// =============================================================================

/// A reference-counted pool of workers sharing one script bundle.
///
/// Pools are shared: many service proxies may hold the same pool, tracked
/// via [`add_reference`](Self::add_reference) /
/// [`remove_reference`](Self::remove_reference). A pool is only torn down by
/// an explicit [`destroy`](Self::destroy) or a registry sweep; dropping the
/// reference count to zero merely makes it sweep-eligible.
pub struct ConcurrentWorkerPool {
    config: WorkerSetConfig,
    launcher: Arc<dyn WorkerLauncher>,

    /// Outbound channels, populated on first connect. Lock order: channels
    /// before states before routers.
    channels: Mutex<Vec<Arc<dyn WorkerChannel>>>,
    states: Mutex<Vec<WorkerState>>,
    routers: Mutex<Vec<JoinHandle<()>>>,

    /// Bumped whenever any worker state changes; connect() waits on it.
    state_changed: watch::Sender<u64>,

    /// Pending requests keyed by correlation id.
    pending: DashMap<u64, PendingRequest>,

    /// Service ids currently registered on this pool.
    services: DashSet<String>,

    next_request_id: AtomicU64,
    next_worker: AtomicUsize,
    references: AtomicUsize,
    terminated: AtomicBool,
}

impl ConcurrentWorkerPool {
    /// Creates an unconnected pool. Workers launch lazily on first
    /// [`connect`](Self::connect).
    pub fn new(config: WorkerSetConfig, launcher: Arc<dyn WorkerLauncher>) -> Arc<Self> {
        let (state_changed, _) = watch::channel(0);
        Arc::new(Self {
            config,
            launcher,
            channels: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            routers: Mutex::new(Vec::new()),
            state_changed,
            pending: DashMap::new(),
            services: DashSet::new(),
            next_request_id: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
            references: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        })
    }

    /// Script identity this pool serves.
    pub fn script(&self) -> &WorkerScript {
        &self.config.script
    }

    /// Configured worker count.
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_request_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of workers that completed the readiness handshake.
    pub fn ready_worker_count(&self) -> usize {
        self.states
            .lock()
            .iter()
            .filter(|s| **s == WorkerState::Ready)
            .count()
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Ensures workers are launched and every worker acknowledged readiness.
    ///
    /// Fails with [`WorkerSetError::ConnectionTimeout`] if any worker misses
    /// the handshake deadline and [`WorkerSetError::WorkerStartup`] if the
    /// script fails to load. A failed connect does not destroy the pool;
    /// other consumers may still be using it.
    pub async fn connect(self: &Arc<Self>) -> Result<(), WorkerSetError> {
        self.ensure_started()?;

        let deadline = tokio::time::Instant::now() + self.config.connection_timeout;
        let mut changes = self.state_changed.subscribe();
        loop {
            {
                let states = self.states.lock();
                if states.iter().any(|s| *s == WorkerState::Failed) {
                    return Err(WorkerSetError::WorkerStartup(format!(
                        "worker for {} failed during handshake",
                        self.config.script
                    )));
                }
                if states.iter().all(|s| *s == WorkerState::Ready) {
                    debug!(script = %self.config.script, workers = states.len(), "worker set ready");
                    return Ok(());
                }
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(WorkerSetError::PoolDestroyed),
                Err(_) => {
                    return Err(WorkerSetError::ConnectionTimeout(
                        self.config.connection_timeout,
                    ))
                }
            }
        }
    }

    fn ensure_started(self: &Arc<Self>) -> Result<(), WorkerSetError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(WorkerSetError::PoolDestroyed);
        }

        let mut channels = self.channels.lock();
        if !channels.is_empty() {
            return Ok(());
        }

        let mut states = self.states.lock();
        let mut routers = self.routers.lock();
        info!(
            script = %self.config.script,
            workers = self.config.worker_count,
            "launching worker set"
        );

        for index in 0..self.config.worker_count {
            let spawned = match self.launcher.launch(&self.config.script) {
                Ok(spawned) => spawned,
                Err(err) => {
                    // Roll back so a later connect can retry from scratch
                    channels.clear();
                    states.clear();
                    for handle in routers.drain(..) {
                        handle.abort();
                    }
                    return Err(err);
                }
            };
            channels.push(spawned.channel);
            states.push(WorkerState::Connecting);

            let pool = Arc::clone(self);
            let mut events = spawned.events;
            routers.push(tokio::spawn(async move {
                pool.route_events(index, &mut events).await;
            }));
        }
        Ok(())
    }

    async fn route_events(
        &self,
        index: usize,
        events: &mut tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Ready => {
                    debug!(worker = index, "worker ready");
                    self.set_state(index, WorkerState::Ready);
                }
                WorkerEvent::Response { id, status } => {
                    match self.pending.remove(&id.0) {
                        Some((_, entry)) => {
                            let result = match status {
                                ResponseStatus::Ok(value) => Ok(value),
                                ResponseStatus::Error(value) => {
                                    Err(WorkerSetError::Application(value))
                                }
                            };
                            let _ = entry.tx.send(result);
                        }
                        // Already timed out, cancelled, or never ours
                        None => debug!(%id, "dropping stale response"),
                    }
                }
            }
        }

        // Event stream ended: the worker is gone. Fail everything still
        // routed to it so callers never hang.
        warn!(worker = index, script = %self.config.script, "worker channel closed");
        self.set_state(index, WorkerState::Failed);
        self.reject_pending_for_worker(index);
    }

    fn set_state(&self, index: usize, state: WorkerState) {
        let mut states = self.states.lock();
        if let Some(slot) = states.get_mut(index) {
            *slot = state;
        }
        drop(states);
        self.state_changed.send_modify(|v| *v += 1);
    }

    fn reject_pending_for_worker(&self, index: usize) {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().worker == index)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(WorkerSetError::ChannelClosed));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Sends a request to one worker and awaits its response.
    ///
    /// The worker is chosen round-robin among ready workers. The returned
    /// future resolves with the worker's payload or rejects with a transport
    /// error ([`RequestTimeout`](WorkerSetError::RequestTimeout),
    /// [`Cancelled`](WorkerSetError::Cancelled), ...) or a worker-reported
    /// [`Application`](WorkerSetError::Application) error. Exactly one
    /// pending-table entry is created and removed per call.
    pub async fn invoke_request(
        &self,
        service: &str,
        request: ServiceRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<Value, WorkerSetError> {
        self.invoke_on_worker(None, service, request, cancellation)
            .await
    }

    /// Sends the same request to every worker.
    ///
    /// All sends run to completion so each worker observes the request, but
    /// the aggregate succeeds only if every worker succeeded; the first
    /// failure (in worker order) is surfaced.
    pub async fn broadcast_request(
        &self,
        service: &str,
        request: ServiceRequest,
    ) -> Result<Vec<Value>, WorkerSetError> {
        let worker_count = self.channels.lock().len();
        if worker_count == 0 {
            return Err(WorkerSetError::ChannelClosed);
        }

        let sends = (0..worker_count)
            .map(|index| self.invoke_on_worker(Some(index), service, request.clone(), None));
        let results = futures::future::join_all(sends).await;

        let mut values = Vec::with_capacity(results.len());
        for result in results {
            values.push(result?);
        }
        Ok(values)
    }

    /// Fire-and-forget configuration push to all workers.
    ///
    /// No response is awaited and delivery is unordered relative to in-flight
    /// requests; receivers apply configuration last-write-wins.
    pub fn broadcast_message(&self, message: ConfigurationMessage) {
        let channels = self.channels.lock().clone();
        for (index, channel) in channels.iter().enumerate() {
            if channel
                .post(WorkerEnvelope::Configuration(message.clone()))
                .is_err()
            {
                warn!(worker = index, "configuration broadcast dropped: channel closed");
            }
        }
    }

    async fn invoke_on_worker(
        &self,
        worker: Option<usize>,
        service: &str,
        request: ServiceRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<Value, WorkerSetError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(WorkerSetError::PoolDestroyed);
        }
        if !request.is_management() && !self.services.contains(service) {
            return Err(WorkerSetError::ServiceNotFound(service.to_string()));
        }

        let (index, channel) = match worker {
            Some(index) => (index, self.channel_at(index)?),
            None => self.select_worker()?,
        };

        let id = RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.0, PendingRequest { tx, worker: index });

        debug!(%id, service, worker = index, "dispatching request");
        if channel
            .post(WorkerEnvelope::Request {
                service: service.to_string(),
                id,
                request,
            })
            .is_err()
        {
            self.pending.remove(&id.0);
            return Err(WorkerSetError::ChannelClosed);
        }

        let timeout = self.config.request_timeout;
        let cancelled = async {
            match &cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = rx => match result {
                Ok(outcome) => outcome,
                // Sender dropped without a response: pool torn down
                Err(_) => Err(WorkerSetError::PoolDestroyed),
            },
            _ = cancelled => {
                self.pending.remove(&id.0);
                debug!(%id, "request cancelled by caller");
                Err(WorkerSetError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.pending.remove(&id.0);
                warn!(%id, ?timeout, "request timed out");
                Err(WorkerSetError::RequestTimeout { id, timeout })
            }
        }
    }

    fn select_worker(&self) -> Result<(usize, Arc<dyn WorkerChannel>), WorkerSetError> {
        let channels = self.channels.lock();
        if channels.is_empty() {
            return Err(WorkerSetError::ChannelClosed);
        }
        let states = self.states.lock();
        let count = channels.len();
        let start = self.next_worker.fetch_add(1, Ordering::Relaxed);
        for offset in 0..count {
            let index = (start + offset) % count;
            if states[index] == WorkerState::Ready {
                return Ok((index, Arc::clone(&channels[index])));
            }
        }
        Err(WorkerSetError::ChannelClosed)
    }

    fn channel_at(&self, index: usize) -> Result<Arc<dyn WorkerChannel>, WorkerSetError> {
        self.channels
            .lock()
            .get(index)
            .cloned()
            .ok_or(WorkerSetError::ChannelClosed)
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    /// Marks a service id as live on this pool.
    pub(crate) fn register_service(&self, service_id: &str) {
        self.services.insert(service_id.to_string());
    }

    /// Removes a service id from the live set.
    pub(crate) fn unregister_service(&self, service_id: &str) {
        self.services.remove(service_id);
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Records one more consumer holding this pool.
    pub fn add_reference(&self) {
        self.references.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases one consumer.
    ///
    /// Reaching zero does not destroy the pool; it only becomes eligible for
    /// a registry sweep. Returns the remaining reference count.
    pub fn remove_reference(&self) -> usize {
        let previous = self
            .references
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current consumer count.
    pub fn reference_count(&self) -> usize {
        self.references.load(Ordering::SeqCst)
    }

    /// Terminates all workers and rejects every pending request with
    /// [`WorkerSetError::PoolDestroyed`]. Idempotent.
    pub fn destroy(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(script = %self.config.script, "destroying worker pool");

        for handle in self.routers.lock().drain(..) {
            handle.abort();
        }
        self.channels.lock().clear();
        {
            let mut states = self.states.lock();
            for state in states.iter_mut() {
                *state = WorkerState::Failed;
            }
        }

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.tx.send(Err(WorkerSetError::PoolDestroyed));
            }
        }
        self.services.clear();
        self.state_changed.send_modify(|v| *v += 1);
    }

    /// True once destroyed, or once every launched worker has failed
    /// (self-terminated pool).
    pub fn is_terminated(&self) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            return true;
        }
        let states = self.states.lock();
        !states.is_empty() && states.iter().all(|s| *s == WorkerState::Failed)
    }

    /// True when a registry sweep may destroy this pool: it already
    /// terminated or no consumer references it.
    pub fn sweep_eligible(&self) -> bool {
        self.is_terminated() || self.reference_count() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
