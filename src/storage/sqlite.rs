//! SQLite lease store implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers never block on the writer
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Contention
//!
//! SQLite has no row locks, so `find_due_endpoint` is a plain read and may
//! hand the same row to two workers. Exclusivity comes from the
//! compare-and-set in `reschedule_if_unchanged`: SQLite serializes writers,
//! so only the first update still sees the observed `next_check_at`.
//! Several processes may share one database file.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{HealthStatus, LeaseStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    EndpointRecord, MonitoredEndpoint, MonitoringResult, ResultColumns, ResultRecord,
    timestamp_to_millis,
};

const ENDPOINT_COLUMNS: &str =
    "id, owner_user_id, name, url, monitored_interval_ms, created_at, next_check_at";

const RESULT_COLUMNS: &str =
    "id, checked_at, status_code, content_type, payload, error, url, monitored_endpoint_id";

/// SQLite lease store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database file and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use http_monitoring::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./monitoring.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        info!("SQLite store ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }
}

#[async_trait]
impl LeaseStore for SqliteStore {
    #[instrument(skip(self))]
    async fn find_due_endpoint(&self, now: DateTime<Utc>) -> StorageResult<Option<MonitoredEndpoint>> {
        let sql = format!(
            "SELECT {ENDPOINT_COLUMNS} FROM monitored_endpoints \
             WHERE next_check_at < ? ORDER BY next_check_at ASC LIMIT 1"
        );

        let record = sqlx::query_as::<_, EndpointRecord>(&sql)
            .bind(timestamp_to_millis(&now))
            .fetch_optional(&self.pool)
            .await?;

        record.map(MonitoredEndpoint::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn reschedule_if_unchanged(
        &self,
        id: Uuid,
        observed: DateTime<Utc>,
        reschedule_to: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE monitored_endpoints SET next_check_at = ? WHERE id = ? AND next_check_at = ?",
        )
        .bind(timestamp_to_millis(&reschedule_to))
        .bind(id.to_string())
        .bind(timestamp_to_millis(&observed))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_endpoint(&self, id: Uuid) -> StorageResult<Option<MonitoredEndpoint>> {
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM monitored_endpoints WHERE id = ?");

        let record = sqlx::query_as::<_, EndpointRecord>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        record.map(MonitoredEndpoint::try_from).transpose()
    }

    #[instrument(skip(self, result), fields(endpoint = %result.monitored_endpoint_id))]
    async fn record_result(
        &self,
        result: &MonitoringResult,
        next_check_at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let columns = ResultColumns::from(&result.outcome);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO monitoring_results (
                id, checked_at, status_code, content_type, payload, error, url, monitored_endpoint_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.id.to_string())
        .bind(timestamp_to_millis(&result.checked_at))
        .bind(columns.status_code)
        .bind(columns.content_type)
        .bind(columns.payload)
        .bind(columns.error)
        .bind(&result.url)
        .bind(result.monitored_endpoint_id.to_string())
        .execute(&mut *tx)
        .await?;

        let rescheduled = sqlx::query("UPDATE monitored_endpoints SET next_check_at = ? WHERE id = ?")
            .bind(timestamp_to_millis(&next_check_at))
            .bind(result.monitored_endpoint_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(rescheduled)
    }

    #[instrument(skip(self))]
    async fn purge_orphaned_results(&self, limit: usize) -> StorageResult<usize> {
        // Selection and deletion in one statement, so the batch deleted is
        // exactly the batch selected.
        let result = sqlx::query(
            r#"
            DELETE FROM monitoring_results
            WHERE id IN (
                SELECT r.id FROM monitoring_results r
                WHERE NOT EXISTS (
                    SELECT 1 FROM monitored_endpoints e WHERE e.id = r.monitored_endpoint_id
                )
                LIMIT ?
            )
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.id))]
    async fn insert_endpoint(&self, endpoint: &MonitoredEndpoint) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_endpoints (
                id, owner_user_id, name, url, monitored_interval_ms, created_at, next_check_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(endpoint.id.to_string())
        .bind(endpoint.owner_user_id.to_string())
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(i64::try_from(endpoint.monitored_interval.as_millis()).unwrap_or(i64::MAX))
        .bind(timestamp_to_millis(&endpoint.created_at))
        .bind(timestamp_to_millis(&endpoint.next_check_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_endpoint(&self, id: Uuid) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM monitored_endpoints WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn results_for_endpoint(&self, id: Uuid) -> StorageResult<Vec<MonitoringResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM monitoring_results \
             WHERE monitored_endpoint_id = ? ORDER BY checked_at DESC"
        );

        let records = sqlx::query_as::<_, ResultRecord>(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(MonitoringResult::try_from).collect()
    }

    async fn count_results(&self) -> StorageResult<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM monitoring_results")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as u64)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite store operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
