//! Orphaned result cleanup
//!
//! Deleting an endpoint does not touch its results. This sweep collects
//! them afterwards: it deletes orphaned results batch by batch until a
//! batch comes back empty. A result written while its endpoint was being
//! deleted may survive one sweep; a later sweep picks it up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::storage::LeaseStore;

use super::error::{MonitorError, describe};

/// Summary of one cleanup sweep
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// Non-empty batches deleted
    pub batches: usize,

    /// Results deleted in total
    pub deleted: usize,

    /// A batch failed and the sweep stopped early
    pub failed: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Delete orphaned results in batches of at most `batch_size`
#[instrument(skip(store))]
pub async fn sweep(store: &dyn LeaseStore, batch_size: usize) -> CleanupReport {
    let started_at = Utc::now();
    let mut batches = 0;
    let mut deleted = 0;
    let mut failed = false;

    debug!("executing orphaned result cleanup");

    loop {
        match store.purge_orphaned_results(batch_size).await {
            Ok(0) => {
                debug!("no orphaned results to delete");
                break;
            }
            Ok(count) => {
                batches += 1;
                deleted += count;
                info!("deleted {count} orphaned results, repeating");
            }
            Err(e) => {
                error!("{}", describe(&MonitorError::CleanupBatchFailure(e)));
                failed = true;
                break;
            }
        }
    }

    if deleted > 0 {
        info!("cleanup finished: {deleted} results in {batches} batches");
    }

    CleanupReport {
        batches,
        deleted,
        failed,
        started_at,
        finished_at: Utc::now(),
    }
}
