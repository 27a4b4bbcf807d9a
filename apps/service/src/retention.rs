//! Periodic pruning of the endpoint change feed.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use storage::{EndpointRepository, StorageError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PRUNE_EVERY: Duration = Duration::from_secs(3600);

pub struct EventRetention {
    endpoints: EndpointRepository,
    max_age: TimeDelta,
}

impl EventRetention {
    pub fn new(endpoints: EndpointRepository, max_age: Duration) -> Self {
        Self { endpoints, max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX) }
    }

    /// Delete feed entries older than the retention window
    pub async fn prune_once(&self) -> Result<u64, StorageError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.max_age) else {
            return Ok(0);
        };
        self.endpoints.prune_events(cutoff).await
    }

    /// Prune every hour until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(PRUNE_EVERY);

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

            match self.prune_once().await {
                Ok(0) => debug!("no endpoint events to prune"),
                Ok(removed) => info!(removed, "pruned endpoint events"),
                Err(err) => warn!(error = %err, "endpoint event pruning failed"),
            }
        }
    }
}
