//! Service proxies.
//!
//! A proxy gives one logical consumer (typically one data source) a stable
//! identity on a shared worker pool. [`WorkerServiceProxy`] carries the
//! shared lifecycle (eager pool reference, idempotent connect, best-effort
//! dispose); [`WorkerBasedDecoder`] and [`WorkerBasedTiler`] add the typed
//! request surface on top of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::WorkerSetError;
use super::pool::ConcurrentWorkerPool;
use super::protocol::{ConfigurationMessage, ServiceRequest, SERVICE_MANAGER};
use crate::geo::TileKey;

// =============================================================================
// Service id generation
// =============================================================================

/// Generates process-unique service ids of the form `{type}-{n}`.
///
/// Injected into proxies rather than living in a global, so tests control id
/// assignment deterministically. The counter is monotonic and never reused.
pub struct ServiceIdGenerator {
    next: AtomicU64,
}

impl ServiceIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id for the given service type.
    pub fn next_id(&self, service_type: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{service_type}-{n}")
    }
}

impl Default for ServiceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Base proxy
// =============================================================================

/// A consumer's handle onto one named service of a shared pool.
///
/// Construction takes a pool reference immediately (not lazily), which
/// guarantees the pool outlives the proxy's first use. The remote service is
/// instantiated on first [`connect`](Self::connect).
pub struct WorkerServiceProxy {
    pool: Arc<ConcurrentWorkerPool>,
    service_type: String,
    service_id: String,
    connected: OnceCell<()>,
}

impl WorkerServiceProxy {
    /// Creates a proxy and eagerly references the pool.
    pub fn new(
        pool: Arc<ConcurrentWorkerPool>,
        service_type: impl Into<String>,
        ids: &ServiceIdGenerator,
    ) -> Self {
        let service_type = service_type.into();
        let service_id = ids.next_id(&service_type);
        pool.add_reference();
        Self {
            pool,
            service_type,
            service_id,
            connected: OnceCell::new(),
        }
    }

    /// This proxy's unique service id.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// The pool this proxy is bound to.
    pub fn pool(&self) -> &Arc<ConcurrentWorkerPool> {
        &self.pool
    }

    /// Connects the pool and instantiates the remote service.
    ///
    /// Idempotent: the first successful call broadcasts `CreateService` to
    /// every worker (domain requests round-robin across all of them, so the
    /// service must exist on each); subsequent calls are no-ops. A failed
    /// attempt leaves the proxy unconnected so a later call can retry.
    pub async fn connect(&self) -> Result<(), WorkerSetError> {
        self.connected
            .get_or_try_init(|| async {
                self.pool.connect().await?;
                self.pool
                    .broadcast_request(
                        SERVICE_MANAGER,
                        ServiceRequest::CreateService {
                            target_service_type: self.service_type.clone(),
                            target_service_id: self.service_id.clone(),
                        },
                    )
                    .await?;
                self.pool.register_service(&self.service_id);
                debug!(service = %self.service_id, "remote service created");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Sends a typed request to this proxy's service.
    pub async fn request(
        &self,
        request: ServiceRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<Value, WorkerSetError> {
        self.pool
            .invoke_request(&self.service_id, request, cancellation)
            .await
    }

    /// Pushes configuration to every worker, fire-and-forget.
    pub fn configure(&self, settings: serde_json::Map<String, Value>, options: Option<Value>) {
        self.pool.broadcast_message(ConfigurationMessage {
            service: self.service_id.clone(),
            settings,
            options,
        });
    }

    /// Best-effort destruction of the remote service.
    ///
    /// Destroy errors are swallowed (the workers may already be gone); the
    /// pool reference is always released.
    pub async fn dispose(&self) {
        if self.connected.get().is_some() {
            // Mirror connect: the service lives on every worker
            let result = self
                .pool
                .broadcast_request(
                    SERVICE_MANAGER,
                    ServiceRequest::DestroyService {
                        target_service_id: self.service_id.clone(),
                    },
                )
                .await;
            if let Err(err) = result {
                debug!(service = %self.service_id, %err, "remote service destroy failed");
            }
            self.pool.unregister_service(&self.service_id);
        }
        self.pool.remove_reference();
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// A decoded tile as returned by a decoder service.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub tile_key: TileKey,
    /// Styled geometry payload, opaque to the dispatch layer.
    pub payload: Value,
}

/// Tile metadata as returned by a decoder service.
#[derive(Debug, Clone, PartialEq)]
pub struct TileInfo {
    pub tile_key: TileKey,
    pub info: Value,
}

/// Proxy for a tile-decoding service running on a worker pool.
pub struct WorkerBasedDecoder {
    proxy: WorkerServiceProxy,
}

impl WorkerBasedDecoder {
    pub fn new(
        pool: Arc<ConcurrentWorkerPool>,
        service_type: impl Into<String>,
        ids: &ServiceIdGenerator,
    ) -> Self {
        Self {
            proxy: WorkerServiceProxy::new(pool, service_type, ids),
        }
    }

    pub fn service_id(&self) -> &str {
        self.proxy.service_id()
    }

    pub async fn connect(&self) -> Result<(), WorkerSetError> {
        self.proxy.connect().await
    }

    /// Decodes a raw tile payload into styled geometry.
    ///
    /// The tile key crosses the wire as its Morton code.
    pub async fn decode_tile(
        &self,
        tile_key: TileKey,
        data: Vec<u8>,
        projection: &str,
        cancellation: Option<CancellationToken>,
    ) -> Result<DecodedTile, WorkerSetError> {
        let payload = self
            .proxy
            .request(
                ServiceRequest::DecodeTileRequest {
                    tile_key: tile_key.morton_code(),
                    data,
                    projection: projection.to_string(),
                },
                cancellation,
            )
            .await?;
        Ok(DecodedTile { tile_key, payload })
    }

    /// Extracts tile metadata without building geometry.
    pub async fn tile_info(
        &self,
        tile_key: TileKey,
        data: Vec<u8>,
        projection: &str,
        cancellation: Option<CancellationToken>,
    ) -> Result<TileInfo, WorkerSetError> {
        let info = self
            .proxy
            .request(
                ServiceRequest::TileInfoRequest {
                    tile_key: tile_key.morton_code(),
                    data,
                    projection: projection.to_string(),
                },
                cancellation,
            )
            .await?;
        Ok(TileInfo { tile_key, info })
    }

    /// Pushes decoder configuration to all workers.
    ///
    /// Unacknowledged by design: a decode already in flight may still run
    /// under the previous configuration.
    pub fn configure(&self, settings: serde_json::Map<String, Value>, options: Option<Value>) {
        self.proxy.configure(settings, options);
    }

    pub async fn dispose(&self) {
        self.proxy.dispose().await;
    }
}

// =============================================================================
// Tiler
// =============================================================================

/// Proxy for a tiling service that cuts registered indexes into tiles.
pub struct WorkerBasedTiler {
    proxy: WorkerServiceProxy,
}

impl WorkerBasedTiler {
    pub fn new(
        pool: Arc<ConcurrentWorkerPool>,
        service_type: impl Into<String>,
        ids: &ServiceIdGenerator,
    ) -> Self {
        Self {
            proxy: WorkerServiceProxy::new(pool, service_type, ids),
        }
    }

    pub fn service_id(&self) -> &str {
        self.proxy.service_id()
    }

    pub async fn connect(&self) -> Result<(), WorkerSetError> {
        self.proxy.connect().await
    }

    /// Registers a tiled index under `index_id`.
    pub async fn register_index(
        &self,
        index_id: &str,
        input: Value,
    ) -> Result<Value, WorkerSetError> {
        self.proxy
            .request(
                ServiceRequest::RegisterIndex {
                    id: index_id.to_string(),
                    input,
                },
                None,
            )
            .await
    }

    /// Replaces a previously registered index.
    pub async fn update_index(
        &self,
        index_id: &str,
        input: Value,
    ) -> Result<Value, WorkerSetError> {
        self.proxy
            .request(
                ServiceRequest::UpdateIndex {
                    id: index_id.to_string(),
                    input,
                },
                None,
            )
            .await
    }

    /// Produces the tiled payload for one tile of a registered index.
    pub async fn tile(&self, index_id: &str, tile_key: TileKey) -> Result<Value, WorkerSetError> {
        self.proxy
            .request(
                ServiceRequest::TileRequest {
                    id: index_id.to_string(),
                    tile_key: tile_key.morton_code(),
                },
                None,
            )
            .await
    }

    pub async fn dispose(&self) {
        self.proxy.dispose().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
