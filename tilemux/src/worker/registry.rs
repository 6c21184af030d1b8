//! Worker set registry.
//!
//! Maps a script identity to a shared [`ConcurrentWorkerPool`] so every data
//! source naming the same script reuses one pool. The registry is an
//! explicitly constructed object owned by the application root, with a
//! defined create/destroy lifecycle; there is no process-global state, so
//! teardown order is explicit and tests stay isolated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::channel::{WorkerLauncher, WorkerScript};
use super::pool::{
    auto_worker_count, ConcurrentWorkerPool, WorkerSetConfig, DEFAULT_CONNECTION_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TILER_WORKER_COUNT,
};
use super::proxy::{ServiceIdGenerator, WorkerBasedDecoder, WorkerBasedTiler};

/// Per-call overrides for pool lookup and creation.
///
/// All fields are optional; unset fields fall back to the registry's default
/// script and the consumer kind's default worker count. Overrides only apply
/// when the lookup actually creates a pool — an existing pool for the same
/// script is reused as-is.
#[derive(Debug, Clone, Default)]
pub struct WorkerSetOptions {
    /// Script to run; defaults to the registry's default script.
    pub script: Option<WorkerScript>,
    /// Worker count used if the pool does not exist yet.
    pub worker_count: Option<usize>,
    /// Connection timeout used if the pool does not exist yet.
    pub connection_timeout: Option<Duration>,
}

/// Registry of worker pools keyed by script identity.
pub struct WorkerSetRegistry {
    launcher: Arc<dyn WorkerLauncher>,
    ids: ServiceIdGenerator,
    default_script: WorkerScript,
    sets: Mutex<HashMap<WorkerScript, Arc<ConcurrentWorkerPool>>>,
}

impl WorkerSetRegistry {
    /// Creates an empty registry.
    pub fn new(default_script: WorkerScript, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            ids: ServiceIdGenerator::new(),
            default_script,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a decoder proxy bound to the pool for the requested script.
    ///
    /// Creates the pool on first use. Decoder pools default to the machine's
    /// available parallelism; see [`get_tiler`](Self::get_tiler) for the
    /// deliberate asymmetry.
    pub fn get_tile_decoder(
        &self,
        service_type: &str,
        options: WorkerSetOptions,
    ) -> WorkerBasedDecoder {
        let pool = self.pool_for(auto_worker_count(), options);
        WorkerBasedDecoder::new(pool, service_type, &self.ids)
    }

    /// Returns a tiler proxy bound to the pool for the requested script.
    ///
    /// Tiler pools default to a single worker. The decoder/tiler default
    /// asymmetry is long-standing behavior and is preserved on purpose.
    pub fn get_tiler(&self, service_type: &str, options: WorkerSetOptions) -> WorkerBasedTiler {
        let pool = self.pool_for(DEFAULT_TILER_WORKER_COUNT, options);
        WorkerBasedTiler::new(pool, service_type, &self.ids)
    }

    fn pool_for(
        &self,
        default_worker_count: usize,
        options: WorkerSetOptions,
    ) -> Arc<ConcurrentWorkerPool> {
        let script = options.script.unwrap_or_else(|| self.default_script.clone());
        let mut sets = self.sets.lock();
        if let Some(pool) = sets.get(&script) {
            return Arc::clone(pool);
        }

        debug!(script = %script, "creating worker pool");
        let config = WorkerSetConfig {
            script: script.clone(),
            worker_count: options.worker_count.unwrap_or(default_worker_count),
            connection_timeout: options
                .connection_timeout
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        let pool = ConcurrentWorkerPool::new(config, Arc::clone(&self.launcher));
        sets.insert(script, Arc::clone(&pool));
        pool
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }

    /// Destroys and forgets the pool for one script. No-op if absent.
    pub fn destroy_worker_set(&self, script: &WorkerScript) {
        if let Some(pool) = self.sets.lock().remove(script) {
            pool.destroy();
        }
    }

    /// Destroys every registered pool and clears the registry.
    pub fn destroy(&self) {
        let pools: Vec<_> = self.sets.lock().drain().collect();
        for (script, pool) in pools {
            info!(%script, "destroying worker set");
            pool.destroy();
        }
    }

    /// Sweep pass: clears the registry if every pool is terminated or
    /// unreferenced.
    ///
    /// Pools can self-terminate (all workers crashed) without any consumer
    /// calling destroy; without this sweep the registry would leak dead
    /// entries. Returns true if the registry was cleared.
    pub fn destroy_if_terminated(&self) -> bool {
        let mut sets = self.sets.lock();
        if sets.values().all(|pool| pool.sweep_eligible()) {
            for (script, pool) in sets.drain() {
                debug!(%script, "sweeping worker set");
                pool.destroy();
            }
            true
        } else {
            false
        }
    }
}
