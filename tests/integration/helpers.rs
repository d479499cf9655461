//! Shared fixtures for integration tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use http_monitoring::config::SchedulerConfig;
use http_monitoring::monitors::{Prober, SweepOptions};
use http_monitoring::storage::sqlite::SqliteStore;
use http_monitoring::storage::{LeaseStore, MonitoredEndpoint};
use tempfile::TempDir;
use uuid::Uuid;

/// A SQLite store in a throwaway directory
///
/// The directory lives as long as the returned `TempDir`.
pub async fn sqlite_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("monitoring.db")).await.unwrap();
    (dir, Arc::new(store))
}

/// Endpoint that became due `overdue` ago
pub fn due_endpoint(name: &str, url: impl Into<String>, interval: Duration, overdue: TimeDelta) -> MonitoredEndpoint {
    MonitoredEndpoint::new(Uuid::new_v4(), name, url, interval, Utc::now() - overdue)
}

pub async fn insert_due(
    store: &dyn LeaseStore,
    count: usize,
    base_url: &str,
    interval: Duration,
) -> Vec<MonitoredEndpoint> {
    let mut endpoints = Vec::with_capacity(count);
    for i in 0..count {
        let endpoint = due_endpoint(
            &format!("endpoint-{i}"),
            format!("{base_url}/targets/{i}"),
            interval,
            TimeDelta::seconds(1),
        );
        store.insert_endpoint(&endpoint).await.unwrap();
        endpoints.push(endpoint);
    }
    endpoints
}

pub fn prober(timeout: Duration) -> Arc<Prober> {
    Arc::new(Prober::new(timeout, 64 * 1024).unwrap())
}

pub fn sweep_options(concurrency: usize) -> SweepOptions {
    SweepOptions {
        concurrency,
        claim_grace: Duration::from_secs(60),
    }
}

/// Scheduler settings whose timer never fires during a test
pub fn manual_scheduler(probe_timeout_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        delay_ms: 3_600_000,
        probe_timeout_ms,
        concurrency: 4,
        ..SchedulerConfig::default()
    }
}

/// SQLite keeps millisecond precision
pub fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}
