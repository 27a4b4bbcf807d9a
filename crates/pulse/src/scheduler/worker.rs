use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::debug;

use crate::endpoint::{Endpoint, EndpointId};
use crate::probe::Prober;
use crate::store::LogWriter;

/// One probe plus its log write, handed to a pool task
pub(crate) struct Attempt {
    pub endpoint: Endpoint,
    pub generation: u64,
    pub previous_stamp: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub(crate) struct ProbeReport {
    pub endpoint_id: EndpointId,
    pub generation: u64,
    /// When the probe returned, before the log write
    pub completed_at: Instant,
    pub stamp: DateTime<Utc>,
    pub written: bool,
}

pub(crate) async fn run_attempt(
    attempt: Attempt,
    prober: Arc<dyn Prober>,
    writer: Arc<LogWriter>,
    permit: OwnedSemaphorePermit,
) -> ProbeReport {
    let Attempt { endpoint, generation, previous_stamp } = attempt;

    let outcome = prober.probe(&endpoint).await;
    let completed_at = Instant::now();
    // The permit bounds concurrent probes, not log writes
    drop(permit);

    let stamp = next_stamp(Utc::now(), previous_stamp);
    let written = writer.write(outcome.to_new_log(endpoint.id, stamp)).await.is_some();
    debug!(endpoint_id = endpoint.id, generation, written, "attempt finished");

    ProbeReport { endpoint_id: endpoint.id, generation, completed_at, stamp, written }
}

/// `created_at` for the next log of an endpoint: wall clock time, bumped past the previous stamp.
pub(crate) fn next_stamp(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(previous) if now <= previous => previous + TimeDelta::microseconds(1),
        _ => now,
    }
}
