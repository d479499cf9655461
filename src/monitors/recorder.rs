//! Result recorder
//!
//! Appends the probe outcome to the result log and moves the endpoint's
//! `next_check_at` to `now + interval`, both in one store transaction.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::storage::{LeaseStore, MonitoredEndpoint, MonitoringResult};

use super::error::MonitorError;
use super::probe::ProbeOutcome;

/// Persist `probe` for `endpoint` and schedule the next check
#[instrument(skip_all, fields(endpoint = %endpoint.id))]
pub async fn record(
    store: &dyn LeaseStore,
    probe: ProbeOutcome,
    endpoint: &MonitoredEndpoint,
    now: DateTime<Utc>,
) -> Result<MonitoringResult, MonitorError> {
    let result = MonitoringResult::new(endpoint, probe.checked_at, probe.outcome);
    let next_check_at = endpoint.next_check_after(now);

    let rescheduled = store
        .record_result(&result, next_check_at)
        .await
        .map_err(|source| MonitorError::PersistenceFailure {
            endpoint: endpoint.id,
            source,
        })?;

    if rescheduled == 0 {
        debug!("endpoint was deleted during the check, result left for cleanup");
    } else {
        debug!("recorded result {}, next check at {}", result.id, next_check_at);
    }

    Ok(result)
}
