//! Orphaned result cleanup against SQLite

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use http_monitoring::monitors::cleanup::sweep;
use http_monitoring::storage::{CheckOutcome, LeaseStore, MonitoringResult};
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn record_results(store: &dyn LeaseStore, endpoint: &http_monitoring::storage::MonitoredEndpoint, count: usize) {
    for i in 0..count {
        let result = MonitoringResult::new(
            endpoint,
            Utc::now() - TimeDelta::seconds(i as i64),
            CheckOutcome::Response {
                status_code: 200,
                content_type: None,
                payload: Some(format!("check {i}")),
            },
        );
        store.record_result(&result, Utc::now()).await.unwrap();
    }
}

#[tokio::test]
async fn test_one_sweep_removes_results_of_deleted_endpoint() {
    let (_dir, store) = sqlite_store().await;
    let doomed = due_endpoint("doomed", "http://doomed.example.com", Duration::from_secs(30), TimeDelta::zero());
    let kept = due_endpoint("kept", "http://kept.example.com", Duration::from_secs(30), TimeDelta::zero());
    store.insert_endpoint(&doomed).await.unwrap();
    store.insert_endpoint(&kept).await.unwrap();
    record_results(store.as_ref(), &doomed, 5).await;
    record_results(store.as_ref(), &kept, 2).await;

    assert_eq!(store.delete_endpoint(doomed.id).await.unwrap(), 1);
    assert_eq!(store.count_results().await.unwrap(), 7);

    let report = sweep(store.as_ref(), 10_000).await;

    assert_eq!(report.deleted, 5);
    assert!(!report.failed);
    assert_eq!(store.results_for_endpoint(doomed.id).await.unwrap().len(), 0);
    assert_eq!(store.results_for_endpoint(kept.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cleanup_converges_across_batches() {
    let (_dir, store) = sqlite_store().await;
    for i in 0..3 {
        let endpoint = due_endpoint(
            &format!("gone-{i}"),
            format!("http://gone-{i}.example.com"),
            Duration::from_secs(30),
            TimeDelta::zero(),
        );
        store.insert_endpoint(&endpoint).await.unwrap();
        record_results(store.as_ref(), &endpoint, 7).await;
        store.delete_endpoint(endpoint.id).await.unwrap();
    }

    let report = sweep(store.as_ref(), 4).await;

    assert_eq!(report.deleted, 21);
    assert_eq!(report.batches, 6);
    assert_eq!(store.count_results().await.unwrap(), 0);
}
