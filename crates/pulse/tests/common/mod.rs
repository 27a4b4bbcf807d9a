#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use pulse::{
    Endpoint, EndpointId, FaultSink, HttpMethod, Log, LogStore, LogWriter, NewLog,
    OperationalFault, Outcome, Prober, RetryPolicy, Scheduler, SchedulerConfig, SchedulerHandle,
    StoreError,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn endpoint(id: EndpointId, interval_seconds: u32) -> Endpoint {
    Endpoint {
        id,
        user_id: 1,
        name: format!("endpoint-{id}"),
        url: format!("http://probe.test/{id}"),
        method: HttpMethod::Get,
        expected_status: 200,
        interval_seconds,
        is_active: true,
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone)]
pub struct ProbeCall {
    pub endpoint_id: EndpointId,
    pub url: String,
    pub started: Instant,
}

/// Prober that sleeps instead of doing I/O and records how it was called
#[derive(Default)]
pub struct FakeProber {
    latency: Mutex<HashMap<EndpointId, Duration>>,
    status: Mutex<HashMap<EndpointId, u16>>,
    calls: Mutex<Vec<ProbeCall>>,
    panics: Mutex<HashMap<EndpointId, u32>>,
    running: Mutex<HashMap<EndpointId, usize>>,
    max_per_endpoint: AtomicUsize,
    running_total: AtomicUsize,
    max_total: AtomicUsize,
}

impl FakeProber {
    pub fn set_latency(&self, endpoint_id: EndpointId, latency: Duration) {
        self.latency.lock().unwrap().insert(endpoint_id, latency);
    }

    /// Status the fake target answers with; defaults to the expected one
    pub fn set_status(&self, endpoint_id: EndpointId, status: u16) {
        self.status.lock().unwrap().insert(endpoint_id, status);
    }

    /// The next `count` calls for the endpoint panic instead of returning
    pub fn panic_next(&self, endpoint_id: EndpointId, count: u32) {
        self.panics.lock().unwrap().insert(endpoint_id, count);
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, endpoint_id: EndpointId) -> Vec<ProbeCall> {
        self.calls().into_iter().filter(|call| call.endpoint_id == endpoint_id).collect()
    }

    pub fn max_per_endpoint(&self) -> usize {
        self.max_per_endpoint.load(Ordering::SeqCst)
    }

    pub fn max_total(&self) -> usize {
        self.max_total.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Prober for FakeProber {
    async fn probe(&self, endpoint: &Endpoint) -> Outcome {
        let started = Instant::now();
        self.calls.lock().unwrap().push(ProbeCall {
            endpoint_id: endpoint.id,
            url: endpoint.url.clone(),
            started,
        });
        let panics = {
            let mut panics = self.panics.lock().unwrap();
            match panics.get_mut(&endpoint.id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        // Raised outside the lock so the mutex is not poisoned
        if panics {
            panic!("injected panic for endpoint {}", endpoint.id);
        }
        {
            let mut running = self.running.lock().unwrap();
            let count = running.entry(endpoint.id).or_default();
            *count += 1;
            self.max_per_endpoint.fetch_max(*count, Ordering::SeqCst);
        }
        let total = self.running_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_total.fetch_max(total, Ordering::SeqCst);

        let latency = self.latency.lock().unwrap().get(&endpoint.id).copied().unwrap_or_default();
        tokio::time::sleep(latency).await;

        self.running_total.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.running.lock().unwrap().get_mut(&endpoint.id) {
            *count -= 1;
        }

        let status =
            self.status.lock().unwrap().get(&endpoint.id).copied().unwrap_or(endpoint.expected_status);
        Outcome::from_status(endpoint.expected_status, status, started.elapsed())
    }
}

/// In-memory log store with injectable failures
#[derive(Default)]
pub struct MemoryLogStore {
    logs: Mutex<Vec<Log>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    attempts: AtomicU32,
}

impl MemoryLogStore {
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.always_fail.store(unavailable, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn logs(&self) -> Vec<Log> {
        self.logs.lock().unwrap().clone()
    }

    pub fn logs_for(&self, endpoint_id: EndpointId) -> Vec<Log> {
        self.logs().into_iter().filter(|log| log.endpoint_id == endpoint_id).collect()
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, log: NewLog) -> Result<Log, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let mut logs = self.logs.lock().unwrap();
        let stored = log.with_id(logs.len() as i64 + 1);
        logs.push(stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
pub struct RecordingFaultSink {
    faults: Mutex<Vec<OperationalFault>>,
}

impl RecordingFaultSink {
    pub fn faults(&self) -> Vec<OperationalFault> {
        self.faults.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FaultSink for RecordingFaultSink {
    async fn report(&self, fault: &OperationalFault) {
        self.faults.lock().unwrap().push(fault.clone());
    }
}

pub fn test_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub handle: SchedulerHandle,
    pub prober: Arc<FakeProber>,
    pub store: Arc<MemoryLogStore>,
    pub faults: Arc<RecordingFaultSink>,
    pub task: JoinHandle<()>,
}

pub fn start(workers: usize) -> Harness {
    start_with(SchedulerConfig { workers, ..SchedulerConfig::default() })
}

pub fn start_with(config: SchedulerConfig) -> Harness {
    let prober = Arc::new(FakeProber::default());
    let store = Arc::new(MemoryLogStore::default());
    let faults = Arc::new(RecordingFaultSink::default());
    let writer = Arc::new(LogWriter::new(store.clone(), test_retry(), faults.clone()));
    let (handle, task) = Scheduler::start(config, prober.clone(), writer);
    Harness { handle, prober, store, faults, task }
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

pub fn secs(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
