//! Claiming due endpoints
//!
//! A claim is a three step exchange with the store:
//!
//! ```text
//! find_due_endpoint(now) → reschedule_if_unchanged(id, observed, now + grace) == 1 → get_endpoint(id)
//! ```
//!
//! Only when the provisional reschedule changed exactly one row does the
//! worker own the endpoint for this cycle. If the worker dies afterwards the
//! endpoint becomes due again once the grace window has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace};

use crate::storage::{LeaseStore, MonitoredEndpoint, schema::advance};

use super::error::MonitorError;

pub struct Claimer {
    store: Arc<dyn LeaseStore>,
    grace: Duration,
    lost: usize,
}

impl Claimer {
    pub fn new(store: Arc<dyn LeaseStore>, grace: Duration) -> Self {
        Self {
            store,
            grace,
            lost: 0,
        }
    }

    /// Number of candidates lost to concurrent workers so far
    pub fn lost(&self) -> usize {
        self.lost
    }

    /// Claim the endpoint that has been due the longest
    ///
    /// Lost candidates are skipped and selection starts over. Returns
    /// `Ok(None)` once nothing is due any more.
    #[instrument(skip(self))]
    pub async fn claim_next(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<MonitoredEndpoint>, MonitorError> {
        loop {
            let Some(candidate) = self
                .store
                .find_due_endpoint(now)
                .await
                .map_err(MonitorError::ClaimSelectionFailure)?
            else {
                trace!("no due endpoint left");
                return Ok(None);
            };

            match self.try_claim(&candidate, now).await {
                Ok(endpoint) => return Ok(Some(endpoint)),
                Err(MonitorError::ClaimLost { endpoint }) => {
                    self.lost += 1;
                    debug!("candidate {endpoint} lost, selecting another one");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Provisionally reschedule `candidate` and verify the claim
    async fn try_claim(
        &self,
        candidate: &MonitoredEndpoint,
        now: DateTime<Utc>,
    ) -> Result<MonitoredEndpoint, MonitorError> {
        let reschedule_to = advance(now, self.grace);
        debug!(
            "rescheduling endpoint {} from {} to {}",
            candidate.id, candidate.next_check_at, reschedule_to
        );

        let affected = self
            .store
            .reschedule_if_unchanged(candidate.id, candidate.next_check_at, reschedule_to)
            .await
            .map_err(MonitorError::ClaimSelectionFailure)?;

        if affected != 1 {
            return Err(MonitorError::ClaimLost {
                endpoint: candidate.id,
            });
        }

        // Re-read so downstream sees the row as it is after the claim.
        self.store
            .get_endpoint(candidate.id)
            .await
            .map_err(MonitorError::ClaimSelectionFailure)?
            .ok_or(MonitorError::ClaimLost {
                endpoint: candidate.id,
            })
    }
}
