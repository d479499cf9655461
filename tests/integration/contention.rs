//! Several workers, each with its own connection pool, sweeping one database

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http_monitoring::monitors::run_sweep;
use http_monitoring::storage::LeaseStore;
use http_monitoring::storage::sqlite::SqliteStore;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_probe_each_endpoint_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(20)))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("shared.db");

    let seed = SqliteStore::new(&db_path).await.unwrap();
    let endpoints = insert_due(&seed, 30, &mock_server.uri(), Duration::from_secs(300)).await;

    let mut workers = vec![];
    for _ in 0..3 {
        let store: Arc<dyn LeaseStore> = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        workers.push(tokio::spawn(run_sweep(
            store,
            prober(Duration::from_secs(5)),
            sweep_options(4),
        )));
    }

    let mut claimed = 0;
    for worker in workers {
        claimed += worker.await.unwrap().claimed;
    }
    assert_eq!(claimed, 30);

    for endpoint in &endpoints {
        let results = seed.results_for_endpoint(endpoint.id).await.unwrap();
        assert_eq!(results.len(), 1, "endpoint {} has {} results", endpoint.name, results.len());
    }

    let mut hits: HashMap<String, usize> = HashMap::new();
    for request in mock_server.received_requests().await.unwrap() {
        *hits.entry(request.url.path().to_string()).or_default() += 1;
    }
    assert_eq!(hits.len(), 30);
    assert!(hits.values().all(|count| *count == 1));
}
