//! CleanupActor - deletes orphaned results on a fixed delay
//!
//! ```text
//! Timer tick → cleanup::sweep (batch, batch, ..., empty) → Publish SweepEvent::Cleanup
//!     ↑
//!     └─── Commands (SweepNow, GetStats, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::config::CleanupConfig;
use crate::monitors::{CleanupReport, cleanup};
use crate::storage::LeaseStore;

use super::messages::{CleanupCommand, CleanupStats, SweepEvent};

pub struct CleanupActor {
    store: Arc<dyn LeaseStore>,
    batch_size: usize,
    delay: Duration,
    command_rx: mpsc::Receiver<CleanupCommand>,
    event_tx: broadcast::Sender<SweepEvent>,
    stats: CleanupStats,
}

impl CleanupActor {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        config: &CleanupConfig,
        command_rx: mpsc::Receiver<CleanupCommand>,
        event_tx: broadcast::Sender<SweepEvent>,
    ) -> Self {
        Self {
            store,
            batch_size: config.batch_size,
            delay: config.delay(),
            command_rx,
            event_tx,
            stats: CleanupStats::default(),
        }
    }

    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn run(mut self) {
        debug!("starting cleanup actor");

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
                        Some(CleanupCommand::SweepNow { respond_to }) => {
                            debug!("received SweepNow command");
                            let report = self.sweep().await;
                            let _ = respond_to.send(report);
                        }

                        Some(CleanupCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        Some(CleanupCommand::Shutdown) => {
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

        debug!("cleanup actor stopped");
    }

    async fn sweep(&mut self) -> CleanupReport {
        let report = cleanup::sweep(self.store.as_ref(), self.batch_size).await;
        self.stats.add(&report);

        if self.event_tx.send(SweepEvent::Cleanup(report.clone())).is_err() {
            trace!("no subscribers for cleanup report");
        }

        report
    }
}

/// Handle for controlling a CleanupActor
pub struct CleanupHandle {
    sender: mpsc::Sender<CleanupCommand>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    pub fn spawn(
        store: Arc<dyn LeaseStore>,
        config: &CleanupConfig,
        event_tx: broadcast::Sender<SweepEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = CleanupActor::new(store, config, cmd_rx, event_tx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Run a cleanup sweep immediately and wait for its report
    pub async fn sweep_now(&self) -> Result<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CleanupCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive cleanup report")
    }

    pub async fn get_stats(&self) -> Result<CleanupStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CleanupCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive stats")
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(CleanupCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("cleanup actor terminated abnormally: {e}");
        }
    }
}
