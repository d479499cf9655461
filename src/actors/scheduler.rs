//! MonitorActor - runs claim sweeps on a fixed delay
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → run_sweep (claim → probe → record) → Publish SweepEvent::Monitor
//!     ↑
//!     └─── Commands (SweepNow, GetStats, Shutdown)
//! ```
//!
//! The next tick is scheduled relative to the end of the previous sweep, so
//! a slow sweep delays the following one instead of piling up behind it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::config::SchedulerConfig;
use crate::monitors::{Prober, SweepOptions, SweepReport, run_sweep};
use crate::storage::LeaseStore;

use super::messages::{MonitorCommand, MonitorStats, SweepEvent};

/// Actor driving the monitoring loop of one worker
pub struct MonitorActor {
    store: Arc<dyn LeaseStore>,

    /// Shared by all probe workers of a sweep
    prober: Arc<Prober>,

    options: SweepOptions,

    /// Pause between two sweeps
    delay: Duration,

    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Broadcast sender for finished sweep reports
    event_tx: broadcast::Sender<SweepEvent>,

    stats: MonitorStats,
}

impl MonitorActor {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        config: &SchedulerConfig,
        command_rx: mpsc::Receiver<MonitorCommand>,
        event_tx: broadcast::Sender<SweepEvent>,
    ) -> Result<Self> {
        let prober = Prober::new(config.probe_timeout(), config.max_payload_bytes)?;

        Ok(Self {
            store,
            prober: Arc::new(prober),
            options: SweepOptions::from(config),
            delay: config.delay(),
            command_rx,
            event_tx,
            stats: MonitorStats::default(),
        })
    }

    /// Run the actor's main loop
    ///
    /// This runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(concurrency = self.options.concurrency))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let mut ticker = interval(self.delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                    ticker.reset();
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(MonitorCommand::SweepNow { respond_to }) => {
                            debug!("received SweepNow command");
                            let report = self.sweep().await;
                            let _ = respond_to.send(report);
                        }

                        Some(MonitorCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        Some(MonitorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        // Every handle is gone
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("monitor actor stopped");
    }

    async fn sweep(&mut self) -> SweepReport {
        let report = run_sweep(self.store.clone(), self.prober.clone(), self.options).await;
        self.stats.add(&report);

        // No subscribers is fine
        if self.event_tx.send(SweepEvent::Monitor(report.clone())).is_err() {
            trace!("no subscribers for sweep report");
        }

        report
    }
}

/// Handle for controlling a MonitorActor
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Spawn a new monitor actor
    pub fn spawn(
        store: Arc<dyn LeaseStore>,
        config: &SchedulerConfig,
        event_tx: broadcast::Sender<SweepEvent>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MonitorActor::new(store, config, cmd_rx, event_tx)?;
        let task = tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            task,
        })
    }

    /// Run a claim sweep immediately and wait for its report
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep report")
    }

    pub async fn get_stats(&self) -> Result<MonitorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive stats")
    }

    /// Shut down the actor and wait for the running sweep to finish
    pub async fn shutdown(self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("monitor actor terminated abnormally: {e}");
        }
    }
}
