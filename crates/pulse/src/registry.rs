//! Endpoint registry contract and the watcher feeding its changes to the scheduler.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, EndpointId};
use crate::scheduler::{SchedulerError, SchedulerHandle};
use crate::store::{FaultSink, OperationalFault, StoreError, report_fault};

/// Position in the registry change feed; changes after it have a larger cursor
pub type Cursor = i64;

/// A committed registry mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "endpoint", rename_all = "snake_case")]
pub enum RegistryEvent {
    Created(Endpoint),
    /// Carries the full record after the change
    Updated(Endpoint),
    Activated(Endpoint),
    Deactivated(Endpoint),
    Deleted(EndpointId),
}

impl RegistryEvent {
    pub fn endpoint_id(&self) -> EndpointId {
        match self {
            RegistryEvent::Created(endpoint)
            | RegistryEvent::Updated(endpoint)
            | RegistryEvent::Activated(endpoint)
            | RegistryEvent::Deactivated(endpoint) => endpoint.id,
            RegistryEvent::Deleted(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegistryEvent::Created(_) => "created",
            RegistryEvent::Updated(_) => "updated",
            RegistryEvent::Activated(_) => "activated",
            RegistryEvent::Deactivated(_) => "deactivated",
            RegistryEvent::Deleted(_) => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryChange {
    pub cursor: Cursor,
    pub event: RegistryEvent,
}

/// Read side of the endpoint registry, as seen by the engine
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Every active, non-deleted endpoint
    async fn load_active(&self) -> Result<Vec<Endpoint>, StoreError>;

    /// Cursor of the most recent change, 0 when there is none
    async fn latest_cursor(&self) -> Result<Cursor, StoreError>;

    /// Up to `limit` changes strictly after `cursor`, oldest first
    async fn changes_since(&self, cursor: Cursor, limit: usize) -> Result<Vec<RegistryChange>, StoreError>;
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("registry error: {0}")]
    Registry(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(1), batch_size: 256 }
    }
}

/// Tails the registry change feed and applies it to a scheduler
pub struct RegistryWatcher {
    registry: Arc<dyn Registry>,
    scheduler: SchedulerHandle,
    faults: Arc<dyn FaultSink>,
    config: WatcherConfig,
}

impl RegistryWatcher {
    pub fn new(
        registry: Arc<dyn Registry>,
        scheduler: SchedulerHandle,
        faults: Arc<dyn FaultSink>,
        config: WatcherConfig,
    ) -> Self {
        Self { registry, scheduler, faults, config }
    }

    /// Schedule every active endpoint and return the cursor to tail from.
    ///
    /// The cursor is read before the snapshot, so a change racing the load is
    /// replayed rather than lost; replays are harmless.
    pub async fn bootstrap(&self) -> Result<Cursor, WatcherError> {
        let cursor = self.registry.latest_cursor().await?;
        let endpoints = self.registry.load_active().await?;
        let total = endpoints.len();
        let mut rejected = 0;

        for endpoint in endpoints {
            let endpoint_id = endpoint.id;
            match self.scheduler.register(endpoint).await {
                Ok(()) => {}
                Err(SchedulerError::Closed) => return Err(SchedulerError::Closed.into()),
                Err(err) => {
                    rejected += 1;
                    warn!(endpoint_id, error = %err, "skipping endpoint at startup");
                }
            }
        }

        info!(total, rejected, cursor, "registry loaded");
        Ok(cursor)
    }

    /// Apply one batch of changes after `cursor`; returns the new cursor.
    pub async fn poll_once(&self, cursor: Cursor) -> Result<Cursor, WatcherError> {
        let changes = self.registry.changes_since(cursor, self.config.batch_size).await?;
        let mut cursor = cursor;

        for change in changes {
            let endpoint_id = change.event.endpoint_id();
            let kind = change.event.kind();
            match self.scheduler.apply(change.event).await {
                Ok(()) => debug!(endpoint_id, kind, cursor = change.cursor, "change applied"),
                Err(SchedulerError::Closed) => return Err(SchedulerError::Closed.into()),
                // The registry accepted it; the engine cannot probe it. Nothing to retry.
                Err(err) => warn!(endpoint_id, kind, error = %err, "change rejected by scheduler"),
            }
            cursor = change.cursor;
        }

        Ok(cursor)
    }

    /// Poll until `shutdown` flips to true or the scheduler goes away.
    pub async fn run(self, mut cursor: Cursor, mut shutdown: watch::Receiver<bool>) -> Cursor {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // One fault per outage, not one per tick
        let mut failing = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.poll_once(cursor).await {
                Ok(next) => {
                    if failing {
                        info!(cursor = next, "registry reachable again");
                        failing = false;
                    }
                    cursor = next;
                }
                Err(WatcherError::Scheduler(SchedulerError::Closed)) => {
                    info!("scheduler closed, registry watcher exiting");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, cursor, "registry poll failed, retrying next tick");
                    if !failing {
                        failing = true;
                        let fault = OperationalFault::RegistryUnavailable { error: err.to_string() };
                        report_fault(self.faults.as_ref(), fault).await;
                    }
                }
            }
        }

        cursor
    }
}
