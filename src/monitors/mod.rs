//! Monitoring loops
//!
//! ```text
//! claim::Claimer ─► probe::Prober ─► recorder::record      (pool::run_sweep)
//! cleanup::sweep                                            (orphaned results)
//! ```
//!
//! Workers coordinate only through the store. Any number of them may run the
//! same sweeps concurrently against one database.

pub mod claim;
pub mod cleanup;
pub mod error;
pub mod pool;
pub mod probe;
pub mod recorder;

pub use cleanup::CleanupReport;
pub use error::MonitorError;
pub use pool::{SweepOptions, SweepReport, run_sweep};
pub use probe::{BoundedBody, ProbeOutcome, Prober};
