//! End-to-end claim sweeps against a SQLite store
//!
//! - A due endpoint answering 200 gets a result and is rescheduled by its interval
//! - A probe exceeding its timeout is recorded as an error
//! - Sweeps over an empty due set change nothing
//! - Every result carries either a status code or an error

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use http_monitoring::monitors::run_sweep;
use http_monitoring::storage::LeaseStore;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_healthy_endpoint_is_recorded_and_rescheduled() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let endpoint = due_endpoint(
        "status-page",
        format!("{}/status", mock_server.uri()),
        Duration::from_secs(30),
        TimeDelta::seconds(2),
    );
    store.insert_endpoint(&endpoint).await.unwrap();

    let t0 = Utc::now();
    let report = run_sweep(store.clone(), prober(Duration::from_secs(5)), sweep_options(2)).await;

    assert_eq!(report.claimed, 1);
    assert_eq!(report.probes_succeeded, 1);

    let results = store.results_for_endpoint(endpoint.id).await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status_code(), Some(200));
    assert_eq!(result.error(), None);
    assert_eq!(result.payload(), Some("ok"));
    assert_eq!(result.content_type(), Some("text/plain"));
    assert_eq!(result.url, endpoint.url);
    assert!(millis(result.checked_at) >= millis(t0));

    let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    let next = millis(stored.next_check_at);
    assert!(next >= millis(t0 + TimeDelta::seconds(30)), "rescheduled too early");
    assert!(next < millis(t0 + TimeDelta::seconds(31)), "rescheduled too late");
}

#[tokio::test]
async fn test_slow_endpoint_is_recorded_as_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let endpoint = due_endpoint("slow", mock_server.uri(), Duration::from_secs(30), TimeDelta::seconds(1));
    store.insert_endpoint(&endpoint).await.unwrap();

    let t0 = Utc::now();
    let report = run_sweep(store.clone(), prober(Duration::from_millis(250)), sweep_options(1)).await;

    assert_eq!(report.probes_failed, 1);

    let results = store.results_for_endpoint(endpoint.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status_code(), None);
    assert_eq!(results[0].payload(), None);
    assert!(results[0].error().unwrap().contains("timed out"));

    // A failed probe is rescheduled like a successful one.
    let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert!(millis(stored.next_check_at) >= millis(t0 + TimeDelta::seconds(30)));
}

#[tokio::test]
async fn test_empty_due_set_is_a_no_op() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let mut future = due_endpoint("later", mock_server.uri(), Duration::from_secs(30), TimeDelta::zero());
    future.next_check_at = Utc::now() + TimeDelta::minutes(10);
    store.insert_endpoint(&future).await.unwrap();

    for _ in 0..2 {
        let report = run_sweep(store.clone(), prober(Duration::from_secs(1)), sweep_options(4)).await;
        assert_eq!(report.claimed, 0);
    }

    assert_eq!(store.count_results().await.unwrap(), 0);
    let stored = store.get_endpoint(future.id).await.unwrap().unwrap();
    assert_eq!(millis(stored.next_check_at), millis(future.next_check_at));
}

#[tokio::test]
async fn test_results_hold_either_status_or_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let (_dir, store) = sqlite_store().await;
    let broken = due_endpoint(
        "broken",
        format!("{}/broken", mock_server.uri()),
        Duration::from_secs(60),
        TimeDelta::seconds(3),
    );
    let unreachable = due_endpoint(
        "unreachable",
        "http://127.0.0.1:9/",
        Duration::from_secs(60),
        TimeDelta::seconds(2),
    );
    store.insert_endpoint(&broken).await.unwrap();
    store.insert_endpoint(&unreachable).await.unwrap();

    let report = run_sweep(store.clone(), prober(Duration::from_secs(5)), sweep_options(2)).await;
    assert_eq!(report.claimed, 2);

    let broken_results = store.results_for_endpoint(broken.id).await.unwrap();
    assert_eq!(broken_results[0].status_code(), Some(500));
    assert_eq!(broken_results[0].error(), None);

    let unreachable_results = store.results_for_endpoint(unreachable.id).await.unwrap();
    assert_eq!(unreachable_results[0].status_code(), None);
    assert!(unreachable_results[0].error().is_some());
}
