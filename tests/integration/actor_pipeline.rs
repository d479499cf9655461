//! Actor handles driving sweeps and publishing reports

use std::time::Duration;

use chrono::TimeDelta;
use http_monitoring::actors::{CleanupHandle, MonitorHandle, SweepEvent};
use http_monitoring::config::CleanupConfig;
use http_monitoring::storage::LeaseStore;
use tokio::sync::broadcast;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_monitor_and_cleanup_actors_share_a_store() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let (event_tx, mut event_rx) = broadcast::channel(64);

    let monitor = MonitorHandle::spawn(store.clone(), &manual_scheduler(2_000), event_tx.clone()).unwrap();
    let cleanup = CleanupHandle::spawn(
        store.clone(),
        &CleanupConfig {
            delay_ms: 3_600_000,
            ..CleanupConfig::default()
        },
        event_tx,
    );

    let endpoints = insert_due(store.as_ref(), 3, &mock_server.uri(), Duration::from_secs(120)).await;

    // The startup tick may already have claimed them; either way each is
    // checked exactly once.
    monitor.sweep_now().await.unwrap();
    assert_eq!(store.count_results().await.unwrap(), 3);

    store.delete_endpoint(endpoints[0].id).await.unwrap();
    cleanup.sweep_now().await.unwrap();
    assert_eq!(store.count_results().await.unwrap(), 2);

    let mut monitor_claims = 0;
    let mut cleanup_deleted = 0;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            SweepEvent::Monitor(report) => monitor_claims += report.claimed,
            SweepEvent::Cleanup(report) => cleanup_deleted += report.deleted,
        }
    }
    assert_eq!(monitor_claims, 3);
    assert_eq!(cleanup_deleted, 1);

    let stats = monitor.get_stats().await.unwrap();
    assert_eq!(stats.probes_succeeded, 3);
    assert_eq!(cleanup.get_stats().await.unwrap().deleted, 1);

    monitor.shutdown().await;
    cleanup.shutdown().await;
}

#[tokio::test]
async fn test_monitor_timer_checks_due_endpoints() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let endpoint = due_endpoint("ticked", mock_server.uri(), Duration::from_secs(600), TimeDelta::seconds(1));
    store.insert_endpoint(&endpoint).await.unwrap();

    let mut config = manual_scheduler(2_000);
    config.delay_ms = 50;
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let monitor = MonitorHandle::spawn(store.clone(), &config, event_tx).unwrap();

    let claimed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SweepEvent::Monitor(report)) = event_rx.recv().await {
                if report.claimed > 0 {
                    return report.claimed;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(claimed, 1);
    assert_eq!(store.results_for_endpoint(endpoint.id).await.unwrap().len(), 1);

    monitor.shutdown().await;
}
