//! Wiring of the running service: storage, prober, scheduler and the background loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pulse::{
    FaultSink, HttpProber, LogWriter, Registry, RegistryWatcher, Scheduler, SchedulerHandle,
    TracingFaultSink,
};
use storage::Storage;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alerts::SlackFaultSink;
use crate::config::Config;
use crate::retention::EventRetention;

const STATS_EVERY: Duration = Duration::from_secs(60);

fn fault_sink(config: &Config) -> Result<Arc<dyn FaultSink>> {
    match &config.alerts.slack_webhook_url {
        Some(url) => {
            info!("slack alerts enabled");
            Ok(Arc::new(SlackFaultSink::new(url.clone()).context("failed to build slack client")?))
        }
        None => Ok(Arc::new(TracingFaultSink)),
    }
}

async fn report_stats(scheduler: SchedulerHandle, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(STATS_EVERY);
    ticker.tick().await;

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

        let Ok(stats) = scheduler.stats().await else {
            break;
        };
        info!(
            scheduled = stats.scheduled,
            in_flight = stats.in_flight,
            ready = stats.ready,
            completed = stats.completed,
            deferred = stats.deferred,
            logs_written = stats.logs_written,
            logs_dropped = stats.logs_dropped,
            invariant_violations = stats.invariant_violations,
            "scheduler stats"
        );
    }
}

pub async fn run(config: Config) -> Result<()> {
    let storage = Storage::open(&config.database.path)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;

    let faults = fault_sink(&config)?;
    let prober = HttpProber::new(config.scheduler.timeout_ceiling()).context("failed to build http client")?;
    let writer = LogWriter::new(Arc::new(storage.logs()), config.log_store.retry_policy(), Arc::clone(&faults));
    let (scheduler, mut engine) =
        Scheduler::start(config.scheduler.engine_config(), Arc::new(prober), Arc::new(writer));

    let registry: Arc<dyn Registry> = Arc::new(storage.endpoints());
    let watcher = RegistryWatcher::new(
        registry,
        scheduler.clone(),
        Arc::clone(&faults),
        config.registry.watcher_config(),
    );
    let cursor = watcher.bootstrap().await.context("failed to load endpoints")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(cursor, shutdown_rx.clone()));
    let retention = EventRetention::new(storage.endpoints(), config.registry.event_retention());
    let retention_task = tokio::spawn(retention.run(shutdown_rx.clone()));
    let stats_task = tokio::spawn(report_stats(scheduler.clone(), shutdown_rx));

    info!(workers = config.scheduler.workers, "pulse service running");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "cannot listen for ctrl-c, shutting down");
            }
            info!("shutting down");
        }
        exited = &mut engine => {
            error!(?exited, "scheduler stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    let final_cursor = watcher_task.await.context("registry watcher panicked")?;
    // Closed means the engine is already gone
    let _ = scheduler.shutdown().await;
    if !engine.is_finished() {
        let _ = engine.await;
    }
    let _ = retention_task.await;
    let _ = stats_task.await;

    info!(cursor = final_cursor, "pulse service stopped");
    Ok(())
}
