//! PostgreSQL lease store implementation
//!
//! Enabled with the `storage-postgres` feature. Suitable for several
//! worker instances on different machines.
//!
//! ## Contention
//!
//! Due-endpoint selection and orphan selection use
//! `FOR UPDATE SKIP LOCKED`: rows another worker is touching are left out
//! of the candidate set instead of blocking the query. The provisional
//! reschedule keeps its compare-and-set, because the row lock taken by the
//! selection ends with that statement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
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

/// PostgreSQL lease store
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to `database_url` and run migrations
    #[instrument(skip_all)]
    pub async fn new(database_url: &str) -> StorageResult<Self> {
        info!("connecting to PostgreSQL store");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations/postgres").run(&pool).await?;

        info!("PostgreSQL store ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl LeaseStore for PostgresStore {
    #[instrument(skip(self))]
    async fn find_due_endpoint(&self, now: DateTime<Utc>) -> StorageResult<Option<MonitoredEndpoint>> {
        let sql = format!(
            "SELECT {ENDPOINT_COLUMNS} FROM monitored_endpoints \
             WHERE next_check_at < $1 ORDER BY next_check_at ASC LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
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
            "UPDATE monitored_endpoints SET next_check_at = $1 WHERE id = $2 AND next_check_at = $3",
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
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM monitored_endpoints WHERE id = $1");

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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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

        let rescheduled =
            sqlx::query("UPDATE monitored_endpoints SET next_check_at = $1 WHERE id = $2")
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
        let result = sqlx::query(
            r#"
            DELETE FROM monitoring_results
            WHERE id IN (
                SELECT r.id FROM monitoring_results r
                WHERE NOT EXISTS (
                    SELECT 1 FROM monitored_endpoints e WHERE e.id = r.monitored_endpoint_id
                )
                LIMIT $1
                FOR UPDATE SKIP LOCKED
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        let result = sqlx::query("DELETE FROM monitored_endpoints WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn results_for_endpoint(&self, id: Uuid) -> StorageResult<Vec<MonitoringResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM monitoring_results \
             WHERE monitored_endpoint_id = $1 ORDER BY checked_at DESC"
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
                message: "PostgreSQL store operational".to_string(),
                metadata: HashMap::from([("backend".to_string(), "postgres".to_string())]),
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
        info!("closing PostgreSQL store");
        self.pool.close().await;
        Ok(())
    }
}
