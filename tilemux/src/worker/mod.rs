//! Concurrent tile-processing dispatch layer.
//!
//! Tile decoding and tiling run on worker processes behind a message-based
//! transport. This module layers request/response semantics, service
//! multiplexing, and lifecycle management on top of that transport:
//!
//! ```text
//! DataSource ──► WorkerBasedDecoder ──► ConcurrentWorkerPool ──► WorkerChannel
//!                (per-consumer proxy)    (shared, ref-counted)    (transport seam)
//!                        ▲
//!                        │
//!               WorkerSetRegistry
//!               (one pool per script)
//! ```
//!
//! See [`pool::ConcurrentWorkerPool`] for the correlation/timeout machinery
//! and [`registry::WorkerSetRegistry`] for pool sharing.

pub mod channel;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod registry;

pub use channel::{
    ChannelClosed, LocalWorkerLauncher, ServiceHandler, SpawnedWorker, WorkerChannel,
    WorkerLauncher, WorkerScript,
};
pub use error::WorkerSetError;
pub use pool::{
    auto_worker_count, ConcurrentWorkerPool, WorkerSetConfig, WorkerState,
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TILER_WORKER_COUNT,
};
pub use protocol::{
    ConfigurationMessage, RequestId, ResponseStatus, ServiceRequest, WorkerEnvelope, WorkerEvent,
    SERVICE_MANAGER,
};
pub use proxy::{
    DecodedTile, ServiceIdGenerator, TileInfo, WorkerBasedDecoder, WorkerBasedTiler,
    WorkerServiceProxy,
};
pub use registry::{WorkerSetOptions, WorkerSetRegistry};
