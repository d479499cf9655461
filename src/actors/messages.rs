//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Events**: Finished sweep reports broadcast to any subscriber
//! 3. **Stats**: Running totals, answered through a oneshot channel

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::monitors::{CleanupReport, SweepReport};

/// Event published after every finished sweep
///
/// Subscribers that lag behind simply miss reports; the data of record lives
/// in the store.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// A claim sweep of the monitoring loop finished
    Monitor(SweepReport),

    /// A cleanup sweep finished
    Cleanup(CleanupReport),
}

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a claim sweep right away (bypassing the interval timer)
    SweepNow {
        respond_to: oneshot::Sender<SweepReport>,
    },

    /// Get the totals of all sweeps so far
    GetStats {
        respond_to: oneshot::Sender<MonitorStats>,
    },

    /// Gracefully shut down the actor
    ///
    /// A sweep in progress is finished first.
    Shutdown,
}

/// Commands that can be sent to the CleanupActor
#[derive(Debug)]
pub enum CleanupCommand {
    /// Run a cleanup sweep right away
    SweepNow {
        respond_to: oneshot::Sender<CleanupReport>,
    },

    GetStats {
        respond_to: oneshot::Sender<CleanupStats>,
    },

    Shutdown,
}

/// Running totals of the monitoring loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    /// Number of claim sweeps run
    pub sweeps: u64,

    pub claimed: u64,
    pub claims_lost: u64,
    pub probes_succeeded: u64,
    pub probes_failed: u64,
    pub persistence_failures: u64,

    /// Sweeps cut short by a failing candidate selection
    pub selection_failures: u64,

    pub last_sweep: Option<DateTime<Utc>>,
}

impl MonitorStats {
    pub fn add(&mut self, report: &SweepReport) {
        self.sweeps += 1;
        self.claimed += report.claimed as u64;
        self.claims_lost += report.claims_lost as u64;
        self.probes_succeeded += report.probes_succeeded as u64;
        self.probes_failed += report.probes_failed as u64;
        self.persistence_failures += report.persistence_failures as u64;
        if report.selection_failed {
            self.selection_failures += 1;
        }
        self.last_sweep = report.finished_at;
    }
}

/// Running totals of the cleanup loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub sweeps: u64,

    /// Orphaned results deleted in total
    pub deleted: u64,

    pub batches: u64,

    /// Sweeps stopped by a failing batch
    pub failed_sweeps: u64,

    pub last_sweep: Option<DateTime<Utc>>,
}

impl CleanupStats {
    pub fn add(&mut self, report: &CleanupReport) {
        self.sweeps += 1;
        self.deleted += report.deleted as u64;
        self.batches += report.batches as u64;
        if report.failed {
            self.failed_sweeps += 1;
        }
        self.last_sweep = Some(report.finished_at);
    }
}
