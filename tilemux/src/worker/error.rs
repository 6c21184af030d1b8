//! Error types for the worker dispatch layer.

use std::time::Duration;

use serde_json::Value;

use super::protocol::RequestId;

/// Errors produced by worker pools and service proxies.
///
/// Transport and lifecycle errors are generated by the pool itself;
/// [`WorkerSetError::Application`] carries a worker-reported failure payload
/// through unmodified.
#[derive(Debug, thiserror::Error)]
pub enum WorkerSetError {
    /// Not every worker became ready within the connection timeout.
    #[error("worker set connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The worker script failed to load or start.
    #[error("worker startup failed: {0}")]
    WorkerStartup(String),

    /// A request received no response within its per-request timeout.
    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: RequestId, timeout: Duration },

    /// The target service id is not registered on the pool.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The caller's cancellation token aborted the request.
    #[error("request cancelled")]
    Cancelled,

    /// The pool was destroyed while the request was pending, or a request
    /// was issued after destruction.
    #[error("worker pool destroyed")]
    PoolDestroyed,

    /// The worker channel closed (worker crashed or was torn down) with the
    /// request still in flight.
    #[error("worker channel closed")]
    ChannelClosed,

    /// The service reported an application-level failure; the payload is
    /// opaque to the pool.
    #[error("worker reported error: {0}")]
    Application(Value),
}

impl WorkerSetError {
    /// Returns true for errors owned by the pool (as opposed to
    /// worker-reported application errors).
    pub fn is_transport(&self) -> bool {
        !matches!(self, WorkerSetError::Application(_))
    }
}
