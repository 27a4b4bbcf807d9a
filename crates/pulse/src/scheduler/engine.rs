use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::queue::{DueQueue, Ticket};
use super::slot::{EndpointState, Slot, SlotState};
use super::worker::{Attempt, ProbeReport, run_attempt};
use super::{Command, EngineStats, SchedulerConfig, SchedulerError};
use crate::endpoint::{Endpoint, EndpointId};
use crate::probe::Prober;
use crate::store::{LogWriter, OperationalFault, report_fault};
use crate::validation::{self, MIN_INTERVAL_SECONDS};

/// Dead heap entries tolerated on top of two per live slot before compacting
const COMPACT_SLACK: usize = 64;

#[derive(Debug, Default)]
struct Counters {
    dispatched: u64,
    completed: u64,
    deferred: u64,
    invariant_violations: u64,
}

/// The running attempt of one endpoint
#[derive(Debug, Clone, Copy)]
struct InFlight {
    generation: u64,
}

pub(super) struct Engine {
    config: SchedulerConfig,
    prober: Arc<dyn Prober>,
    writer: Arc<LogWriter>,
    commands: mpsc::Receiver<Command>,
    permits: Arc<Semaphore>,

    slots: HashMap<EndpointId, Slot>,
    deleted: HashSet<EndpointId>,
    queue: DueQueue,
    ready: VecDeque<EndpointId>,

    /// Keyed by endpoint, independent of registration
    in_flight: HashMap<EndpointId, InFlight>,
    tasks: JoinSet<ProbeReport>,
    task_owners: HashMap<task::Id, (EndpointId, u64)>,
    last_stamps: HashMap<EndpointId, DateTime<Utc>>,

    next_generation: u64,
    counters: Counters,
}

fn is_live(slots: &HashMap<EndpointId, Slot>, endpoint_id: EndpointId, ticket: Ticket) -> bool {
    slots.get(&endpoint_id).is_some_and(|slot| slot.holds_ticket(ticket))
}

impl Engine {
    pub fn new(
        config: SchedulerConfig,
        prober: Arc<dyn Prober>,
        writer: Arc<LogWriter>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            prober,
            writer,
            commands,
            slots: HashMap::new(),
            deleted: HashSet::new(),
            queue: DueQueue::default(),
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            task_owners: HashMap::new(),
            last_stamps: HashMap::new(),
            next_generation: 0,
            counters: Counters::default(),
        }
    }

    pub async fn run(mut self) {
        info!(workers = self.config.workers, "scheduler started");

        loop {
            let next_due = {
                let slots = &self.slots;
                self.queue.next_due(|id, ticket| is_live(slots, id, ticket))
            };
            let timer = async move {
                match next_due {
                    Some(due) => sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { ack }) => {
                        self.drain().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.finished(joined);
                }
                permit = self.permits.clone().acquire_owned(), if !self.ready.is_empty() => {
                    if let Ok(permit) = permit {
                        self.start_next_ready(permit);
                    }
                }
                () = timer => {}
            }

            self.collect_due(Instant::now());
            self.start_ready();
        }

        info!("scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { endpoint, ack } => {
                let _ = ack.send(self.register(endpoint));
            }
            Command::Unregister { endpoint_id, ack } => {
                let _ = ack.send(self.unregister(endpoint_id));
            }
            Command::Reconfigure { endpoint_id, interval_seconds, ack } => {
                let _ = ack.send(self.reconfigure(endpoint_id, interval_seconds));
            }
            Command::Update { endpoint, ack } => {
                let _ = ack.send(self.update(endpoint));
            }
            Command::Delete { endpoint_id, ack } => {
                self.delete(endpoint_id);
                let _ = ack.send(());
            }
            Command::Stats { ack } => {
                let _ = ack.send(self.stats());
            }
            Command::State { endpoint_id, ack } => {
                let _ = ack.send(self.state_of(endpoint_id));
            }
            // Handled by the loop itself
            Command::Shutdown { ack } => {
                let _ = ack.send(());
            }
        }
    }

    fn register(&mut self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        let id = endpoint.id;
        if self.deleted.contains(&id) {
            warn!(endpoint_id = id, "refusing to schedule deleted endpoint");
            return Err(SchedulerError::Deleted(id));
        }
        validation::validate_schedulable(&endpoint)
            .map_err(|source| SchedulerError::InvalidEndpoint { id, source })?;

        if self.slots.contains_key(&id) {
            self.replace_config(endpoint);
            return Ok(());
        }

        let now = Instant::now();
        let generation = self.next_generation;
        self.next_generation += 1;
        let ticket = self.queue.push(id, now + endpoint.interval());
        info!(
            endpoint_id = id,
            interval_seconds = endpoint.interval_seconds,
            url = %endpoint.url,
            "endpoint scheduled"
        );
        self.slots.insert(id, Slot::new(endpoint, generation, now, ticket));
        self.maybe_compact();
        Ok(())
    }

    fn unregister(&mut self, endpoint_id: EndpointId) -> bool {
        let Some(slot) = self.slots.remove(&endpoint_id) else {
            return false;
        };
        if slot.state == SlotState::Ready {
            self.ready.retain(|id| *id != endpoint_id);
        }
        info!(endpoint_id, "endpoint unscheduled");
        true
    }

    fn reconfigure(&mut self, endpoint_id: EndpointId, interval_seconds: u32) -> Result<(), SchedulerError> {
        validation::validate_interval(interval_seconds, MIN_INTERVAL_SECONDS)
            .map_err(|source| SchedulerError::InvalidEndpoint { id: endpoint_id, source })?;
        let slot = self
            .slots
            .get_mut(&endpoint_id)
            .ok_or(SchedulerError::NotScheduled(endpoint_id))?;

        if slot.endpoint.interval_seconds == interval_seconds {
            return Ok(());
        }
        slot.endpoint.interval_seconds = interval_seconds;
        self.rebase(endpoint_id);
        Ok(())
    }

    fn update(&mut self, endpoint: Endpoint) -> Result<(), SchedulerError> {
        let id = endpoint.id;
        if self.deleted.contains(&id) {
            return Err(SchedulerError::Deleted(id));
        }
        if !endpoint.is_active {
            self.unregister(id);
            return Ok(());
        }
        if !self.slots.contains_key(&id) {
            return self.register(endpoint);
        }
        validation::validate_schedulable(&endpoint)
            .map_err(|source| SchedulerError::InvalidEndpoint { id, source })?;
        self.replace_config(endpoint);
        Ok(())
    }

    fn delete(&mut self, endpoint_id: EndpointId) {
        self.unregister(endpoint_id);
        self.last_stamps.remove(&endpoint_id);
        if self.deleted.insert(endpoint_id) {
            info!(endpoint_id, "endpoint deleted");
        }
    }

    /// New url, method or status apply to the next probe; a new interval rebases the timer.
    fn replace_config(&mut self, endpoint: Endpoint) {
        let id = endpoint.id;
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        let interval_changed = slot.endpoint.interval_seconds != endpoint.interval_seconds;
        slot.endpoint = endpoint;
        debug!(endpoint_id = id, interval_changed, "endpoint configuration replaced");
        if interval_changed {
            self.rebase(id);
        }
    }

    /// Recompute the due time from the last completion and the current interval.
    ///
    /// Probing slots pick the new interval up when they complete.
    fn rebase(&mut self, endpoint_id: EndpointId) {
        let now = Instant::now();
        let Some(slot) = self.slots.get_mut(&endpoint_id) else {
            return;
        };
        let due = slot.anchor() + slot.endpoint.interval();
        let state = slot.state;

        match state {
            SlotState::Probing => {}
            SlotState::Scheduled { .. } => {
                let ticket = self.queue.push(endpoint_id, due);
                slot.state = SlotState::Scheduled { due, ticket };
            }
            SlotState::Ready | SlotState::AwaitingPrevious if due > now => {
                if state == SlotState::Ready {
                    self.ready.retain(|id| *id != endpoint_id);
                }
                let ticket = self.queue.push(endpoint_id, due);
                slot.state = SlotState::Scheduled { due, ticket };
            }
            SlotState::Ready | SlotState::AwaitingPrevious => {}
        }
        self.maybe_compact();
    }

    fn schedule_at(&mut self, endpoint_id: EndpointId, due: Instant) {
        if let Some(slot) = self.slots.get_mut(&endpoint_id) {
            let ticket = self.queue.push(endpoint_id, due);
            slot.state = SlotState::Scheduled { due, ticket };
        }
    }

    fn maybe_compact(&mut self) {
        if self.queue.len() > 2 * self.slots.len() + COMPACT_SLACK {
            let slots = &self.slots;
            self.queue.compact(|id, ticket| is_live(slots, id, ticket));
        }
    }

    /// Move every endpoint due at `now` towards a worker
    fn collect_due(&mut self, now: Instant) {
        let due = {
            let slots = &self.slots;
            self.queue.drain_due(now, |id, ticket| is_live(slots, id, ticket))
        };

        for endpoint_id in due {
            if self.in_flight.contains_key(&endpoint_id) {
                self.mark(endpoint_id, SlotState::AwaitingPrevious);
                debug!(endpoint_id, "due while the previous attempt is still running");
                continue;
            }
            if self.ready.is_empty() {
                if let Ok(permit) = self.permits.clone().try_acquire_owned() {
                    self.mark(endpoint_id, SlotState::Ready);
                    self.start(endpoint_id, permit);
                    continue;
                }
            }
            self.mark(endpoint_id, SlotState::Ready);
            self.ready.push_back(endpoint_id);
            self.counters.deferred += 1;
            debug!(endpoint_id, waiting = self.ready.len(), "probe deferred, no free worker");
        }
    }

    fn mark(&mut self, endpoint_id: EndpointId, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(&endpoint_id) {
            slot.state = state;
        }
    }

    fn start_ready(&mut self) {
        while !self.ready.is_empty() {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            self.start_next_ready(permit);
        }
    }

    fn start_next_ready(&mut self, permit: OwnedSemaphorePermit) {
        if let Some(endpoint_id) = self.ready.pop_front() {
            self.start(endpoint_id, permit);
        }
    }

    fn start(&mut self, endpoint_id: EndpointId, permit: OwnedSemaphorePermit) {
        let Some(slot) = self.slots.get_mut(&endpoint_id) else {
            return;
        };
        if let Some(running) = self.in_flight.get(&endpoint_id) {
            let detail = format!(
                "second attempt requested while generation {} is in flight",
                running.generation
            );
            slot.state = SlotState::AwaitingPrevious;
            self.invariant_violation(endpoint_id, detail);
            return;
        }

        slot.state = SlotState::Probing;
        let attempt = Attempt {
            endpoint: slot.endpoint.clone(),
            generation: slot.generation,
            previous_stamp: self.last_stamps.get(&endpoint_id).copied(),
        };
        let generation = attempt.generation;
        self.in_flight.insert(endpoint_id, InFlight { generation });

        let handle = self.tasks.spawn(run_attempt(
            attempt,
            Arc::clone(&self.prober),
            Arc::clone(&self.writer),
            permit,
        ));
        self.task_owners.insert(handle.id(), (endpoint_id, generation));
        self.counters.dispatched += 1;
        debug!(endpoint_id, generation, "probe dispatched");
    }

    fn finished(&mut self, joined: Result<(task::Id, ProbeReport), JoinError>) {
        match joined {
            Ok((task_id, report)) => {
                self.task_owners.remove(&task_id);
                // A delete while the attempt ran already dropped the stamp
                if !self.deleted.contains(&report.endpoint_id) {
                    self.last_stamps.insert(report.endpoint_id, report.stamp);
                }
                self.complete(report.endpoint_id, report.generation, report.completed_at);
            }
            Err(err) => {
                let Some((endpoint_id, generation)) = self.task_owners.remove(&err.id()) else {
                    error!(error = %err, "unknown probe task failed");
                    return;
                };
                if err.is_panic() {
                    self.invariant_violation(endpoint_id, "probe task panicked".to_string());
                }
                self.complete(endpoint_id, generation, Instant::now());
            }
        }
    }

    fn complete(&mut self, endpoint_id: EndpointId, generation: u64, completed_at: Instant) {
        self.counters.completed += 1;

        match self.in_flight.remove(&endpoint_id) {
            Some(running) if running.generation == generation => {}
            Some(running) => self.invariant_violation(
                endpoint_id,
                format!(
                    "completion for generation {generation} while generation {} was in flight",
                    running.generation
                ),
            ),
            None => self.invariant_violation(
                endpoint_id,
                format!("completion for generation {generation} with no attempt in flight"),
            ),
        }

        let Some(slot) = self.slots.get_mut(&endpoint_id) else {
            debug!(endpoint_id, "attempt finished for an unscheduled endpoint");
            return;
        };

        let state = slot.state;
        match state {
            SlotState::Probing if slot.generation == generation => {
                slot.last_completed = Some(completed_at);
                let due = completed_at + slot.endpoint.interval();
                self.schedule_at(endpoint_id, due);
            }
            SlotState::AwaitingPrevious => {
                slot.state = SlotState::Ready;
                self.ready.push_back(endpoint_id);
            }
            SlotState::Probing => {
                let due = Instant::now() + slot.endpoint.interval();
                self.schedule_at(endpoint_id, due);
                self.invariant_violation(
                    endpoint_id,
                    format!("generation {generation} finished while another registration was probing"),
                );
            }
            // A re-registration is already waiting for its own due time
            SlotState::Scheduled { .. } | SlotState::Ready => {}
        }
    }

    fn invariant_violation(&mut self, endpoint_id: EndpointId, detail: String) {
        self.counters.invariant_violations += 1;

        // Probing and Scheduled slots already have a next step
        let reset = self.slots.get(&endpoint_id).and_then(|slot| match slot.state {
            SlotState::Ready | SlotState::AwaitingPrevious => {
                Some((slot.state, Instant::now() + slot.endpoint.interval()))
            }
            SlotState::Scheduled { .. } | SlotState::Probing => None,
        });
        if let Some((state, due)) = reset {
            if state == SlotState::Ready {
                self.ready.retain(|id| *id != endpoint_id);
            }
            self.schedule_at(endpoint_id, due);
        }

        let faults = self.writer.faults();
        let fault = OperationalFault::InvariantViolation { endpoint_id, detail };
        tokio::spawn(async move { report_fault(faults.as_ref(), fault).await });
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            scheduled: self.slots.len(),
            in_flight: self.in_flight.len(),
            ready: self.ready.len(),
            dispatched: self.counters.dispatched,
            completed: self.counters.completed,
            deferred: self.counters.deferred,
            logs_written: self.writer.written(),
            logs_dropped: self.writer.dropped(),
            invariant_violations: self.counters.invariant_violations,
        }
    }

    fn state_of(&self, endpoint_id: EndpointId) -> EndpointState {
        if self.deleted.contains(&endpoint_id) {
            return EndpointState::Deleted;
        }
        self.slots
            .get(&endpoint_id)
            .map_or(EndpointState::Unscheduled, |slot| slot.state.into())
    }

    /// Stop dispatching, give running attempts the grace period, then abort the rest.
    async fn drain(&mut self) {
        self.ready.clear();
        self.slots.clear();
        let running = self.tasks.len();
        if running == 0 {
            return;
        }

        info!(running, grace = ?self.config.shutdown_grace, "waiting for in-flight probes");
        let grace = self.config.shutdown_grace;
        let waited = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next_with_id().await {
                self.finished(joined);
            }
        })
        .await;

        if waited.is_err() {
            warn!(remaining = self.tasks.len(), "grace period over, aborting probes");
            self.tasks.shutdown().await;
            self.in_flight.clear();
            self.task_owners.clear();
        }
    }
}
