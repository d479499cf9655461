//! Claim sweep worker pool
//!
//! One claim sweep runs a single claimer and `concurrency` probe workers:
//!
//! ```text
//! Claimer ──(bounded queue, depth N)──► Worker 1..N: probe → record
//!    ▲                                        │
//!    └──────────── permit released ◄──────────┘
//! ```
//!
//! The claimer takes a semaphore permit before every claim and hands it to
//! the worker together with the endpoint. The permit is released after the
//! result is recorded, so at most N claims are outstanding at any time.
//! The sweep ends when nothing is due any more and all workers drained the
//! queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, error, info, instrument};

use crate::config::SchedulerConfig;
use crate::storage::{LeaseStore, MonitoredEndpoint};

use super::claim::Claimer;
use super::error::describe;
use super::probe::Prober;
use super::recorder::record;

/// Summary of one claim sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Endpoints successfully claimed
    pub claimed: usize,

    /// Candidates lost to concurrent workers
    pub claims_lost: usize,

    /// Probes that produced a response
    pub probes_succeeded: usize,

    /// Probes that timed out or failed on the network
    pub probes_failed: usize,

    /// Results that could not be written
    pub persistence_failures: usize,

    /// The sweep stopped early because selecting a candidate failed
    pub selection_failed: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepReport {
    /// Number of probes executed in this sweep
    pub fn probes(&self) -> usize {
        self.probes_succeeded + self.probes_failed
    }
}

/// Sweep settings
#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    /// Maximum number of outstanding claims (and probe workers)
    pub concurrency: usize,

    /// Provisional reschedule applied when claiming
    pub claim_grace: Duration,
}

impl From<&SchedulerConfig> for SweepOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            claim_grace: config.claim_grace(),
        }
    }
}

struct ClaimedEndpoint {
    endpoint: MonitoredEndpoint,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct WorkerTally {
    succeeded: usize,
    failed: usize,
    persistence_failures: usize,
}

/// Claim, probe and record every endpoint that is due right now
#[instrument(skip_all, fields(concurrency = options.concurrency))]
pub async fn run_sweep(
    store: Arc<dyn LeaseStore>,
    prober: Arc<Prober>,
    options: SweepOptions,
) -> SweepReport {
    let width = options.concurrency.max(1);
    let mut report = SweepReport {
        started_at: Some(Utc::now()),
        ..SweepReport::default()
    };

    debug!("starting claim sweep");

    let (claim_tx, claim_rx) = mpsc::channel::<ClaimedEndpoint>(width);
    let claim_rx = Arc::new(Mutex::new(claim_rx));
    let permits = Arc::new(Semaphore::new(width));

    let workers: Vec<_> = (0..width)
        .map(|worker| {
            tokio::spawn(probe_worker(
                worker,
                claim_rx.clone(),
                store.clone(),
                prober.clone(),
            ))
        })
        .collect();

    let mut claimer = Claimer::new(store.clone(), options.claim_grace);

    loop {
        // Suspends while `width` claims are still being processed.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        match claimer.claim_next(Utc::now()).await {
            Ok(Some(endpoint)) => {
                report.claimed += 1;
                debug!("claimed endpoint {} ({})", endpoint.id, endpoint.url);

                let claimed = ClaimedEndpoint {
                    endpoint,
                    _permit: permit,
                };
                if claim_tx.send(claimed).await.is_err() {
                    error!("all probe workers are gone, stopping sweep");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("{}", describe(&e));
                report.selection_failed = true;
                break;
            }
        }
    }

    // Closing the queue lets the workers exit once it is drained.
    drop(claim_tx);

    for tally in futures::future::join_all(workers).await {
        match tally {
            Ok(tally) => {
                report.probes_succeeded += tally.succeeded;
                report.probes_failed += tally.failed;
                report.persistence_failures += tally.persistence_failures;
            }
            Err(e) => error!("probe worker crashed: {e}"),
        }
    }

    report.claims_lost = claimer.lost();
    report.finished_at = Some(Utc::now());

    if report.claimed > 0 {
        info!(
            "claim sweep finished: {} claimed, {} ok, {} failed, {} not persisted",
            report.claimed, report.probes_succeeded, report.probes_failed, report.persistence_failures
        );
    } else {
        debug!("claim sweep finished, nothing was due");
    }

    report
}

async fn probe_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<ClaimedEndpoint>>>,
    store: Arc<dyn LeaseStore>,
    prober: Arc<Prober>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(claimed) = next else {
            break;
        };
        let endpoint = &claimed.endpoint;

        let probe = prober.probe(endpoint).await;
        if probe.is_error() {
            tally.failed += 1;
        } else {
            tally.succeeded += 1;
        }

        if let Err(e) = record(store.as_ref(), probe, endpoint, Utc::now()).await {
            // The provisional reschedule stays in place; the endpoint is
            // retried once the grace window runs out.
            error!("{}", describe(&e));
            tally.persistence_failures += 1;
        }

        // Dropping the claim releases its permit.
        drop(claimed);
    }

    debug!("probe worker {worker} finished");
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
    use wiremock::matchers::method;

    fn options(concurrency: usize) -> SweepOptions {
        SweepOptions {
            concurrency,
            claim_grace: Duration::from_secs(60),
        }
    }

    async fn seed(store: &MemoryStore, base_url: &str, count: usize) -> Vec<MonitoredEndpoint> {
        let mut endpoints = vec![];
        for i in 0..count {
            let endpoint = MonitoredEndpoint::new(
                Uuid::new_v4(),
                format!("endpoint-{i}"),
                format!("{base_url}/e/{i}"),
                Duration::from_secs(300),
                Utc::now() - TimeDelta::seconds(10),
            );
            store.insert_endpoint(&endpoint).await.unwrap();
            endpoints.push(endpoint);
        }
        endpoints
    }

    /// Responds slowly and tracks the highest number of concurrent requests
    struct ConcurrencyProbe {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Respond for ConcurrencyProbe {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.current.fetch_sub(1, Ordering::SeqCst);
            ResponseTemplate::new(200)
        }
    }

    #[tokio::test]
    async fn test_sweep_without_due_endpoints_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(Prober::new(Duration::from_secs(1), 1024).unwrap());

        let report = run_sweep(store.clone(), prober, options(4)).await;

        assert_eq!(report.claimed, 0);
        assert_eq!(report.probes(), 0);
        assert_eq!(store.count_results().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_processes_every_due_endpoint_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let endpoints = seed(&store, &mock_server.uri(), 12).await;
        let prober = Arc::new(Prober::new(Duration::from_secs(5), 1024).unwrap());

        let report = run_sweep(store.clone(), prober, options(3)).await;

        assert_eq!(report.claimed, 12);
        assert_eq!(report.probes_succeeded, 12);
        assert_eq!(report.persistence_failures, 0);

        for endpoint in &endpoints {
            let results = store.results_for_endpoint(endpoint.id).await.unwrap();
            assert_eq!(results.len(), 1);
            let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
            assert!(stored.next_check_at > Utc::now() + TimeDelta::seconds(290));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_respects_concurrency_bound() {
        let mock_server = MockServer::start().await;
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .respond_with(ConcurrencyProbe {
                current: current.clone(),
                peak: peak.clone(),
            })
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryStore::new());
        seed(&store, &mock_server.uri(), 9).await;
        let prober = Arc::new(Prober::new(Duration::from_secs(5), 1024).unwrap());

        let report = run_sweep(store, prober, options(2)).await;

        assert_eq!(report.claimed, 9);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_provisional_reschedule() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let store = Arc::new(FaultyStore {
            fail_record: true,
            ..FaultyStore::default()
        });
        let endpoint = MonitoredEndpoint::new(
            Uuid::new_v4(),
            "alpha",
            mock_server.uri(),
            Duration::from_secs(5),
            Utc::now() - TimeDelta::seconds(10),
        );
        store.inner.insert_endpoint(&endpoint).await.unwrap();
        let prober = Arc::new(Prober::new(Duration::from_secs(5), 1024).unwrap());

        let before = Utc::now();
        let report = run_sweep(store.clone(), prober, options(2)).await;

        assert_eq!(report.claimed, 1);
        assert_eq!(report.persistence_failures, 1);
        assert_eq!(store.inner.count_results().await.unwrap(), 0);

        let stored = store.inner.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert!(stored.next_check_at >= before + TimeDelta::seconds(60));
    }

    #[tokio::test]
    async fn test_selection_failure_stops_sweep() {
        let store = Arc::new(FaultyStore {
            fail_selection: true,
            ..FaultyStore::default()
        });
        let endpoint = MonitoredEndpoint::new(
            Uuid::new_v4(),
            "alpha",
            "http://127.0.0.1:9/",
            Duration::from_secs(5),
            Utc::now() - TimeDelta::seconds(10),
        );
        store.inner.insert_endpoint(&endpoint).await.unwrap();
        let prober = Arc::new(Prober::new(Duration::from_secs(1), 1024).unwrap());

        let report = run_sweep(store.clone(), prober, options(2)).await;

        assert!(report.selection_failed);
        assert_eq!(report.claimed, 0);
        assert_eq!(report.probes(), 0);
        assert_eq!(store.inner.count_results().await.unwrap(), 0);

        let stored = store.inner.get_endpoint(endpoint.id).await.unwrap().unwrap();
        assert_eq!(stored.next_check_at, endpoint.next_check_at);
    }

    /// Memory store with switchable selection and record failures
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_selection: bool,
        fail_record: bool,
    }

    #[async_trait::async_trait]
    impl LeaseStore for FaultyStore {
        async fn find_due_endpoint(
            &self,
            now: DateTime<Utc>,
        ) -> crate::storage::StorageResult<Option<MonitoredEndpoint>> {
            if self.fail_selection {
                return Err(crate::storage::StorageError::ConnectionFailed("pool closed".to_string()));
            }
            self.inner.find_due_endpoint(now).await
        }

        async fn reschedule_if_unchanged(
            &self,
            id: Uuid,
            observed: DateTime<Utc>,
            reschedule_to: DateTime<Utc>,
        ) -> crate::storage::StorageResult<u64> {
            self.inner.reschedule_if_unchanged(id, observed, reschedule_to).await
        }

        async fn get_endpoint(&self, id: Uuid) -> crate::storage::StorageResult<Option<MonitoredEndpoint>> {
            self.inner.get_endpoint(id).await
        }

        async fn record_result(
            &self,
            result: &crate::storage::MonitoringResult,
            next_check_at: DateTime<Utc>,
        ) -> crate::storage::StorageResult<u64> {
            if self.fail_record {
                return Err(crate::storage::StorageError::QueryFailed("disk full".to_string()));
            }
            self.inner.record_result(result, next_check_at).await
        }

        async fn purge_orphaned_results(&self, limit: usize) -> crate::storage::StorageResult<usize> {
            self.inner.purge_orphaned_results(limit).await
        }

        async fn insert_endpoint(&self, endpoint: &MonitoredEndpoint) -> crate::storage::StorageResult<()> {
            self.inner.insert_endpoint(endpoint).await
        }

        async fn delete_endpoint(&self, id: Uuid) -> crate::storage::StorageResult<u64> {
            self.inner.delete_endpoint(id).await
        }

        async fn results_for_endpoint(
            &self,
            id: Uuid,
        ) -> crate::storage::StorageResult<Vec<crate::storage::MonitoringResult>> {
            self.inner.results_for_endpoint(id).await
        }

        async fn count_results(&self) -> crate::storage::StorageResult<u64> {
            self.inner.count_results().await
        }

        async fn health_check(&self) -> crate::storage::StorageResult<crate::storage::HealthStatus> {
            self.inner.health_check().await
        }

        async fn close(&self) -> crate::storage::StorageResult<()> {
            self.inner.close().await
        }
    }
}
