//! Worker transport seam.
//!
//! The pool talks to workers through the [`WorkerChannel`] and
//! [`WorkerLauncher`] traits so the actual transport stays pluggable:
//! embedders bridge to OS processes or browser workers, tests use mocks, and
//! [`LocalWorkerLauncher`] runs service logic on in-process tokio tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::WorkerSetError;
use super::protocol::{
    ConfigurationMessage, ResponseStatus, ServiceRequest, WorkerEnvelope, WorkerEvent,
};

// =============================================================================
// Script identity
// =============================================================================

/// Identity of the script bundle a worker set runs.
///
/// Pools are shared per script: two consumers naming the same script reuse
/// one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerScript(String);

impl WorkerScript {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerScript {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

// =============================================================================
// Channel traits
// =============================================================================

/// The sending side of a worker channel rejected a message because the
/// worker is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

/// Outbound half of a worker transport.
///
/// Posting never blocks; delivery is asynchronous. Responses and lifecycle
/// events arrive on the event receiver handed out at launch time.
pub trait WorkerChannel: Send + Sync {
    fn post(&self, envelope: WorkerEnvelope) -> Result<(), ChannelClosed>;
}

/// A freshly launched worker: its outbound channel plus the stream of events
/// it produces. Dropping the receiver tears the worker down.
pub struct SpawnedWorker {
    pub channel: Arc<dyn WorkerChannel>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Spawns workers for a script identity.
pub trait WorkerLauncher: Send + Sync {
    /// Launches one worker.
    ///
    /// Returns [`WorkerSetError::WorkerStartup`] if the script cannot be
    /// loaded. A launched worker must eventually emit [`WorkerEvent::Ready`]
    /// or the pool's connect will time out.
    fn launch(&self, script: &WorkerScript) -> Result<SpawnedWorker, WorkerSetError>;
}

// =============================================================================
// In-process launcher
// =============================================================================

/// Handles domain requests on behalf of a local worker.
///
/// Called with the target service id and the request; returns the response
/// payload or an opaque error payload.
pub type ServiceHandler =
    dyn Fn(&str, &ServiceRequest) -> Result<Value, Value> + Send + Sync + 'static;

/// Runs workers as in-process tokio tasks.
///
/// Each launched worker keeps its own table of created services, answers
/// management requests itself, and forwards domain requests to the supplied
/// [`ServiceHandler`]. Used by tests and the demo CLI; real embedders supply
/// a launcher bridging to an actual worker runtime.
pub struct LocalWorkerLauncher {
    handler: Arc<ServiceHandler>,
}

impl LocalWorkerLauncher {
    pub fn new(handler: Arc<ServiceHandler>) -> Self {
        Self { handler }
    }
}

impl WorkerLauncher for LocalWorkerLauncher {
    fn launch(&self, script: &WorkerScript) -> Result<SpawnedWorker, WorkerSetError> {
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<WorkerEnvelope>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let handler = Arc::clone(&self.handler);
        let script_name = script.to_string();

        tokio::spawn(async move {
            let mut worker = LocalWorkerState::new(handler);
            let _ = event_tx.send(WorkerEvent::Ready);
            loop {
                tokio::select! {
                    // The host dropped its event receiver: worker torn down
                    _ = event_tx.closed() => break,

                    maybe = inbox_rx.recv() => {
                        let Some(envelope) = maybe else { break };
                        match envelope {
                            WorkerEnvelope::Request { service, id, request } => {
                                let status = worker.handle_request(&service, &request);
                                if event_tx.send(WorkerEvent::Response { id, status }).is_err() {
                                    break;
                                }
                            }
                            WorkerEnvelope::Configuration(config) => {
                                worker.apply_configuration(config);
                            }
                        }
                    }
                }
            }
            debug!(script = %script_name, "local worker stopped");
        });

        Ok(SpawnedWorker {
            channel: Arc::new(LocalChannel { tx: inbox_tx }),
            events: event_rx,
        })
    }
}

struct LocalChannel {
    tx: mpsc::UnboundedSender<WorkerEnvelope>,
}

impl WorkerChannel for LocalChannel {
    fn post(&self, envelope: WorkerEnvelope) -> Result<(), ChannelClosed> {
        self.tx.send(envelope).map_err(|_| ChannelClosed)
    }
}

/// Per-worker service table for the in-process launcher.
struct LocalWorkerState {
    handler: Arc<ServiceHandler>,
    services: HashMap<String, String>,
    configurations: HashMap<String, ConfigurationMessage>,
}

impl LocalWorkerState {
    fn new(handler: Arc<ServiceHandler>) -> Self {
        Self {
            handler,
            services: HashMap::new(),
            configurations: HashMap::new(),
        }
    }

    fn handle_request(&mut self, service: &str, request: &ServiceRequest) -> ResponseStatus {
        match request {
            ServiceRequest::CreateService {
                target_service_type,
                target_service_id,
            } => {
                self.services
                    .insert(target_service_id.clone(), target_service_type.clone());
                ResponseStatus::Ok(Value::Null)
            }
            ServiceRequest::DestroyService { target_service_id } => {
                self.services.remove(target_service_id);
                self.configurations.remove(target_service_id);
                ResponseStatus::Ok(Value::Null)
            }
            other => {
                if !self.services.contains_key(service) {
                    return ResponseStatus::Error(
                        serde_json::json!({"message": format!("unknown service: {service}")}),
                    );
                }
                match (self.handler)(service, other) {
                    Ok(value) => ResponseStatus::Ok(value),
                    Err(value) => ResponseStatus::Error(value),
                }
            }
        }
    }

    fn apply_configuration(&mut self, config: ConfigurationMessage) {
        // Last write wins; configuration is unordered relative to requests.
        self.configurations.insert(config.service.clone(), config);
    }
}
