//! In-memory lease store (no persistence)
//!
//! This store keeps endpoints and results in process memory.
//! It's useful for:
//! - Testing the scheduler without database dependencies
//! - Running a single worker with `storage: none`
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: Workers in other processes cannot see it

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::backend::{HealthStatus, LeaseStore};
use super::error::{StorageError, StorageResult};
use super::schema::{MonitoredEndpoint, MonitoringResult};

#[derive(Default)]
struct MemoryState {
    endpoints: HashMap<Uuid, MonitoredEndpoint>,
    results: Vec<MonitoringResult>,
}

/// In-memory lease store
///
/// Every operation runs under one mutex, so a row is never observed
/// half-updated. Claim exclusivity still relies on the compare-and-set in
/// `reschedule_if_unchanged`, exactly like the SQL stores.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,

    /// When set, every write fails with `QueryFailed`
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent writes fail (or succeed again)
    ///
    /// Lets tests exercise persistence and cleanup failure paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed(
                "in-memory store rejects writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn find_due_endpoint(&self, now: DateTime<Utc>) -> StorageResult<Option<MonitoredEndpoint>> {
        let state = self.state.lock().await;

        Ok(state
            .endpoints
            .values()
            .filter(|endpoint| endpoint.is_due(now))
            .min_by_key(|endpoint| endpoint.next_check_at)
            .cloned())
    }

    async fn reschedule_if_unchanged(
        &self,
        id: Uuid,
        observed: DateTime<Utc>,
        reschedule_to: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        match state.endpoints.get_mut(&id) {
            Some(endpoint) if endpoint.next_check_at == observed => {
                endpoint.next_check_at = reschedule_to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn get_endpoint(&self, id: Uuid) -> StorageResult<Option<MonitoredEndpoint>> {
        Ok(self.state.lock().await.endpoints.get(&id).cloned())
    }

    async fn record_result(
        &self,
        result: &MonitoringResult,
        next_check_at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        state.results.push(result.clone());

        match state.endpoints.get_mut(&result.monitored_endpoint_id) {
            Some(endpoint) => {
                endpoint.next_check_at = next_check_at;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn purge_orphaned_results(&self, limit: usize) -> StorageResult<usize> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let MemoryState { endpoints, results } = &mut *state;

        let mut budget = limit;
        results.retain(|result| {
            if budget > 0 && !endpoints.contains_key(&result.monitored_endpoint_id) {
                budget -= 1;
                false
            } else {
                true
            }
        });

        let deleted = limit - budget;
        debug!("in-memory store purged {} orphaned results", deleted);
        Ok(deleted)
    }

    async fn insert_endpoint(&self, endpoint: &MonitoredEndpoint) -> StorageResult<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let clash = state.endpoints.values().find(|existing| {
            existing.id == endpoint.id
                || (existing.owner_user_id == endpoint.owner_user_id
                    && (existing.name == endpoint.name || existing.url == endpoint.url))
        });

        if let Some(existing) = clash {
            return Err(StorageError::ConstraintViolation(format!(
                "endpoint clashes with existing endpoint {}",
                existing.id
            )));
        }

        state.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> StorageResult<u64> {
        self.check_writable()?;
        let removed = self.state.lock().await.endpoints.remove(&id);
        Ok(u64::from(removed.is_some()))
    }

    async fn results_for_endpoint(&self, id: Uuid) -> StorageResult<Vec<MonitoringResult>> {
        let state = self.state.lock().await;

        let mut results: Vec<MonitoringResult> = state
            .results
            .iter()
            .filter(|result| result.monitored_endpoint_id == id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));

        Ok(results)
    }

    async fn count_results(&self) -> StorageResult<u64> {
        Ok(self.state.lock().await.results.len() as u64)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.lock().await;

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory store operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("endpoints".to_string(), state.endpoints.len().to_string()),
                ("results".to_string(), state.results.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
