use std::sync::Arc;

use clap::Parser;
use http_monitoring::{
    actors::{CleanupHandle, MonitorHandle, SweepEvent},
    config::{Config, log_level, read_config_file},
    monitors::{Prober, SweepOptions, cleanup, run_sweep},
    storage::{self, LeaseStore},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); the environment is used when omitted
    #[arg(short)]
    file: Option<String>,

    /// Run one claim sweep and one cleanup sweep, then exit
    #[arg(long)]
    once: bool,
}

fn init() {
    let level = log_level();
    let filter = filter::Targets::new().with_targets(vec![
        ("http_monitoring", level),
        ("http_monitoring_worker", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => {
            let config = Config::from_env();
            config.validate()?;
            config
        }
    };

    let store = storage::open(&config.storage).await?;
    let health = store.health_check().await?;
    if health.healthy {
        info!("store ready: {}", health.message);
    } else {
        warn!("store reports degraded health: {}", health.message);
    }

    if args.once {
        run_once(store.clone(), &config).await?;
    } else if config.scheduler.enabled {
        run_actors(store.clone(), &config).await?;
    } else {
        info!("scheduling is disabled, nothing to do");
    }

    store.close().await?;
    Ok(())
}

async fn run_once(store: Arc<dyn LeaseStore>, config: &Config) -> anyhow::Result<()> {
    let prober = Prober::new(config.scheduler.probe_timeout(), config.scheduler.max_payload_bytes)?;

    let report = run_sweep(store.clone(), Arc::new(prober), SweepOptions::from(&config.scheduler)).await;
    info!("claim sweep: {}", serde_json::to_string(&report)?);

    let report = cleanup::sweep(store.as_ref(), config.cleanup.batch_size).await;
    info!("cleanup sweep: {}", serde_json::to_string(&report)?);

    Ok(())
}

async fn run_actors(store: Arc<dyn LeaseStore>, config: &Config) -> anyhow::Result<()> {
    let (event_tx, event_rx) = broadcast::channel(64);

    let monitor = MonitorHandle::spawn(store.clone(), &config.scheduler, event_tx.clone())?;
    let cleanup = config
        .cleanup
        .enabled
        .then(|| CleanupHandle::spawn(store.clone(), &config.cleanup, event_tx.clone()));
    drop(event_tx);

    let reporter = tokio::spawn(log_events(event_rx));

    info!("worker running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");

    monitor.shutdown().await;
    if let Some(cleanup) = cleanup {
        cleanup.shutdown().await;
    }

    // All senders are gone once both actors stopped.
    if let Err(e) = reporter.await {
        error!("{e}");
    }

    Ok(())
}

async fn log_events(mut event_rx: broadcast::Receiver<SweepEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(SweepEvent::Monitor(report)) if report.claimed > 0 => {
                debug!(
                    "checked {} endpoints ({} failed)",
                    report.probes(),
                    report.probes_failed
                );
            }
            Ok(SweepEvent::Cleanup(report)) if report.deleted > 0 => {
                debug!("purged {} orphaned results", report.deleted);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                trace!("event logger skipped {skipped} reports");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
