//! Wire protocol for worker services.
//!
//! Every message crossing the worker boundary is a closed, serde-tagged enum
//! so protocol evolution is compile-time checked; there are no duck-typed
//! message shapes. Field names are camelCase on the wire to stay compatible
//! with script-side service implementations.
//!
//! Tile keys travel as a single 64-bit Morton code (see
//! [`crate::geo::TileKey::morton_code`]) rather than as a structured
//! level/row/col record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Correlation id for a request/response pair.
///
/// Unique within a pool's lifetime while the request is pending; responses
/// are matched solely by this id, never by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of the built-in management service present on every worker.
///
/// Service creation and destruction requests are addressed to it; all other
/// requests target a service id previously registered through it.
pub const SERVICE_MANAGER: &str = "service-manager";

// =============================================================================
// Requests (host → worker)
// =============================================================================

/// A request addressed to one named service on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceRequest {
    /// Instantiate a service on the worker (management request).
    #[serde(rename_all = "camelCase")]
    CreateService {
        target_service_type: String,
        target_service_id: String,
    },

    /// Tear down a service on the worker (management request).
    #[serde(rename_all = "camelCase")]
    DestroyService { target_service_id: String },

    /// Decode raw tile payload into styled geometry.
    #[serde(rename_all = "camelCase")]
    DecodeTileRequest {
        tile_key: u64,
        data: Vec<u8>,
        projection: String,
    },

    /// Extract tile metadata without building geometry.
    #[serde(rename_all = "camelCase")]
    TileInfoRequest {
        tile_key: u64,
        data: Vec<u8>,
        projection: String,
    },

    /// Register a tiled index with a tiler service.
    RegisterIndex { id: String, input: Value },

    /// Replace a previously registered tiled index.
    UpdateIndex { id: String, input: Value },

    /// Produce the tiled payload for one tile of a registered index.
    #[serde(rename_all = "camelCase")]
    TileRequest { id: String, tile_key: u64 },
}

impl ServiceRequest {
    /// Returns true for requests handled by the worker's management service.
    pub fn is_management(&self) -> bool {
        matches!(
            self,
            ServiceRequest::CreateService { .. } | ServiceRequest::DestroyService { .. }
        )
    }
}

/// Fire-and-forget configuration push.
///
/// Configuration is unacknowledged by design: broadcasts are unordered
/// relative to in-flight requests and the receiving service applies them
/// last-write-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationMessage {
    /// Target service id.
    pub service: String,

    /// Well-known settings, flattened onto the message body.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, Value>,

    /// Consumer-specific options, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Envelope for everything posted to a worker channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerEnvelope {
    /// A correlated request expecting exactly one response.
    #[serde(rename_all = "camelCase")]
    Request {
        service: String,
        id: RequestId,
        request: ServiceRequest,
    },

    /// An unacknowledged configuration broadcast.
    Configuration(ConfigurationMessage),
}

// =============================================================================
// Events (worker → host)
// =============================================================================

/// Outcome of a single request, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "camelCase")]
pub enum ResponseStatus {
    /// Request succeeded; payload is service-specific.
    Ok(Value),
    /// Request failed inside the service; payload is opaque to the pool.
    Error(Value),
}

/// Messages delivered by a worker to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerEvent {
    /// Handshake acknowledgement: the worker script loaded and is ready to
    /// accept requests.
    Ready,

    /// Response to a previously posted request.
    #[serde(rename_all = "camelCase")]
    Response { id: RequestId, status: ResponseStatus },
}
