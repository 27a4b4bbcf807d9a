//! Health-check scheduling and probing engine.
//!
//! Endpoints come from a [`registry::Registry`], get probed by a
//! [`probe::Prober`] on the cadence kept by the [`scheduler`], and every
//! outcome is appended to a [`store::LogStore`].

pub mod endpoint;
pub mod probe;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod validation;

pub use endpoint::{Endpoint, EndpointId, HttpMethod, Log, NewLog, UserId};
pub use probe::{FailureCategory, HttpProber, Outcome, Prober};
pub use registry::{Cursor, Registry, RegistryChange, RegistryEvent, RegistryWatcher, WatcherConfig};
pub use retry::RetryPolicy;
pub use scheduler::{EndpointState, EngineStats, Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle};
pub use store::{FaultSink, LogStore, LogWriter, OperationalFault, StoreError, TracingFaultSink};
pub use validation::ValidationError;
