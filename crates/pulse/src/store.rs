//! Log store contract and the write path used by probe workers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, error};

use crate::endpoint::{EndpointId, Log, NewLog};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Append-only store of probe outcomes
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, log: NewLog) -> Result<Log, StoreError>;
}

/// Conditions worth an operator's attention; the engine keeps running through all of them.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationalFault {
    LogWriteFailed { endpoint_id: EndpointId, attempts: u32, error: String },
    RegistryUnavailable { error: String },
    InvariantViolation { endpoint_id: EndpointId, detail: String },
}

impl fmt::Display for OperationalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationalFault::LogWriteFailed { endpoint_id, attempts, error } => write!(
                f,
                "dropped probe log for endpoint {endpoint_id} after {attempts} attempts: {error}"
            ),
            OperationalFault::RegistryUnavailable { error } => {
                write!(f, "endpoint registry unavailable: {error}")
            }
            OperationalFault::InvariantViolation { endpoint_id, detail } => {
                write!(f, "scheduler invariant violated for endpoint {endpoint_id}: {detail}")
            }
        }
    }
}

/// Destination for operational faults (alerting, paging, ...)
#[async_trait::async_trait]
pub trait FaultSink: Send + Sync {
    async fn report(&self, fault: &OperationalFault);
}

/// Default sink: the `pulse::fault` log line is the whole report
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

#[async_trait::async_trait]
impl FaultSink for TracingFaultSink {
    async fn report(&self, _fault: &OperationalFault) {}
}

/// Log the fault loudly, then hand it to the sink.
pub async fn report_fault(sink: &dyn FaultSink, fault: OperationalFault) {
    error!(target: "pulse::fault", %fault, "operational fault");
    sink.report(&fault).await;
}

/// Appends probe logs with bounded retry, dropping them (and reporting a fault) when the
/// store stays unavailable.
pub struct LogWriter {
    store: Arc<dyn LogStore>,
    retry: RetryPolicy,
    faults: Arc<dyn FaultSink>,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl LogWriter {
    pub fn new(store: Arc<dyn LogStore>, retry: RetryPolicy, faults: Arc<dyn FaultSink>) -> Self {
        Self { store, retry, faults, written: AtomicU64::new(0), dropped: AtomicU64::new(0) }
    }

    pub fn faults(&self) -> Arc<dyn FaultSink> {
        Arc::clone(&self.faults)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the stored log, or `None` when the outcome had to be dropped.
    pub async fn write(&self, log: NewLog) -> Option<Log> {
        let endpoint_id = log.endpoint_id;
        let result = self
            .retry
            .run("log append", |_| {
                let store = Arc::clone(&self.store);
                let log = log.clone();
                async move { store.append(log).await }
            })
            .await;

        match result {
            Ok(stored) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint_id, log_id = stored.id, "probe log stored");
                Some(stored)
            }
            Err(exhausted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let fault = OperationalFault::LogWriteFailed {
                    endpoint_id,
                    attempts: exhausted.attempts,
                    error: exhausted.last_error.to_string(),
                };
                report_fault(self.faults.as_ref(), fault).await;
                None
            }
        }
    }
}
