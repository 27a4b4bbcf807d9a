//! The probe scheduler.
//!
//! One control loop owns every timer. Callers talk to it through a cloneable
//! [`SchedulerHandle`]; each call is a command on a single channel and returns
//! once the loop has applied it, so mutations are observed in the order they
//! were acknowledged.
//!
//! Due endpoints are probed on a bounded pool of workers. An endpoint that
//! comes due while every worker is busy waits in a FIFO ready queue: its probe
//! is late, never skipped. The next probe is scheduled relative to the
//! completion of the previous one, so slow targets do not accumulate a backlog.

mod engine;
mod queue;
mod slot;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::endpoint::{Endpoint, EndpointId};
use crate::probe::Prober;
use crate::registry::RegistryEvent;
use crate::store::LogWriter;
use crate::validation::ValidationError;

pub use slot::EndpointState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of probes running at once
    pub workers: usize,
    pub command_buffer: usize,
    /// How long `shutdown` waits for in-flight probes before aborting them
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { workers: 32, command_buffer: 1024, shutdown_grace: Duration::from_secs(10) }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    Closed,

    #[error("endpoint {id} cannot be scheduled: {source}")]
    InvalidEndpoint {
        id: EndpointId,
        #[source]
        source: ValidationError,
    },

    #[error("endpoint {0} was deleted")]
    Deleted(EndpointId),

    #[error("endpoint {0} is not scheduled")]
    NotScheduled(EndpointId),
}

/// Counters and gauges of a running scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub scheduled: usize,
    pub in_flight: usize,
    pub ready: usize,
    pub dispatched: u64,
    pub completed: u64,
    /// Due probes that had to wait for a free worker
    pub deferred: u64,
    pub logs_written: u64,
    pub logs_dropped: u64,
    pub invariant_violations: u64,
}

type Ack<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    Register { endpoint: Endpoint, ack: Ack<Result<(), SchedulerError>> },
    Unregister { endpoint_id: EndpointId, ack: Ack<bool> },
    Reconfigure { endpoint_id: EndpointId, interval_seconds: u32, ack: Ack<Result<(), SchedulerError>> },
    Update { endpoint: Endpoint, ack: Ack<Result<(), SchedulerError>> },
    Delete { endpoint_id: EndpointId, ack: Ack<()> },
    Stats { ack: Ack<EngineStats> },
    State { endpoint_id: EndpointId, ack: Ack<EndpointState> },
    Shutdown { ack: Ack<()> },
}

pub struct Scheduler;

impl Scheduler {
    /// Spawn the control loop on the current runtime.
    ///
    /// The returned join handle resolves after `shutdown` completes or every
    /// handle has been dropped.
    pub fn start(
        config: SchedulerConfig,
        prober: Arc<dyn Prober>,
        writer: Arc<LogWriter>,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let engine = engine::Engine::new(config, prober, writer, rx);
        let task = tokio::spawn(engine.run());
        (SchedulerHandle { tx }, task)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, command: impl FnOnce(Ack<T>) -> Command) -> Result<T, SchedulerError> {
        let (ack, response) = oneshot::channel();
        self.tx.send(command(ack)).await.map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Closed)
    }

    /// Start probing `endpoint`; the first probe is one interval from now.
    ///
    /// Registering an endpoint that is already scheduled updates its
    /// configuration instead.
    pub async fn register(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Register { endpoint, ack }).await?
    }

    /// Stop probing. A probe already running still writes its log.
    ///
    /// Returns whether the endpoint was scheduled.
    pub async fn unregister(&self, endpoint_id: EndpointId) -> Result<bool, SchedulerError> {
        self.request(|ack| Command::Unregister { endpoint_id, ack }).await
    }

    pub async fn reconfigure(
        &self,
        endpoint_id: EndpointId,
        interval_seconds: u32,
    ) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Reconfigure { endpoint_id, interval_seconds, ack }).await?
    }

    pub async fn activate(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        self.register(endpoint).await
    }

    pub async fn deactivate(&self, endpoint_id: EndpointId) -> Result<bool, SchedulerError> {
        self.unregister(endpoint_id).await
    }

    /// Replace the stored configuration of an endpoint.
    ///
    /// Inactive records are unscheduled, unknown active ones registered.
    pub async fn update(&self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Update { endpoint, ack }).await?
    }

    /// Unschedule and forget an endpoint for good
    pub async fn delete(&self, endpoint_id: EndpointId) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Delete { endpoint_id, ack }).await
    }

    /// Apply one registry change event
    pub async fn apply(&self, event: RegistryEvent) -> Result<(), SchedulerError> {
        let result = match event {
            RegistryEvent::Created(endpoint) | RegistryEvent::Activated(endpoint) => {
                if endpoint.is_active {
                    self.register(endpoint).await
                } else {
                    self.update(endpoint).await
                }
            }
            RegistryEvent::Updated(endpoint) => self.update(endpoint).await,
            RegistryEvent::Deactivated(endpoint) => self.unregister(endpoint.id).await.map(|_| ()),
            RegistryEvent::Deleted(endpoint_id) => self.delete(endpoint_id).await,
        };

        match result {
            Err(SchedulerError::Deleted(endpoint_id)) => {
                warn!(endpoint_id, "ignoring change event for deleted endpoint");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn stats(&self) -> Result<EngineStats, SchedulerError> {
        self.request(|ack| Command::Stats { ack }).await
    }

    pub async fn state_of(&self, endpoint_id: EndpointId) -> Result<EndpointState, SchedulerError> {
        self.request(|ack| Command::State { endpoint_id, ack }).await
    }

    /// Stop dispatching and wait (up to the grace period) for running probes
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Shutdown { ack }).await
    }
}
