//! Lease store trait definition
//!
//! This module defines the `LeaseStore` trait that every storage
//! implementation must provide. The store is the only coordination point
//! between monitoring workers, which may live in different processes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StorageResult;
use super::schema::{MonitoredEndpoint, MonitoringResult};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for durable stores shared by monitoring workers
///
/// ## Contention
///
/// Workers never coordinate in-process. Exclusivity comes from two store
/// operations used together:
///
/// 1. `find_due_endpoint` never waits on rows another actor is claiming; it
///    skips them (or, on backends without row locks, may return a row that
///    is about to be lost).
/// 2. `reschedule_if_unchanged` only applies when the row still carries the
///    `next_check_at` the caller observed, and reports how many rows it
///    changed. A claim is valid only when that count is exactly one.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across tasks.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Find the endpoint that has been due the longest
    ///
    /// Only endpoints with `next_check_at < now` qualify. Rows currently
    /// locked by another claimer are skipped rather than waited for.
    async fn find_due_endpoint(&self, now: DateTime<Utc>) -> StorageResult<Option<MonitoredEndpoint>>;

    /// Move `next_check_at` of one endpoint to `reschedule_to`
    ///
    /// The update only applies while the row still has `observed` as its
    /// `next_check_at`. Returns the number of affected rows.
    async fn reschedule_if_unchanged(
        &self,
        id: Uuid,
        observed: DateTime<Utc>,
        reschedule_to: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Point lookup by id
    async fn get_endpoint(&self, id: Uuid) -> StorageResult<Option<MonitoredEndpoint>>;

    /// Append a result and reschedule its endpoint in one transaction
    ///
    /// Returns the number of endpoint rows rescheduled; zero means the
    /// endpoint was deleted meanwhile and the result is already an orphan.
    async fn record_result(
        &self,
        result: &MonitoringResult,
        next_check_at: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Delete one batch of results whose endpoint no longer exists
    ///
    /// Selects at most `limit` orphaned results (skipping rows locked by a
    /// concurrent sweep) and deletes exactly that batch. Returns how many
    /// rows were deleted.
    async fn purge_orphaned_results(&self, limit: usize) -> StorageResult<usize>;

    /// Register a new endpoint
    async fn insert_endpoint(&self, endpoint: &MonitoredEndpoint) -> StorageResult<()>;

    /// Delete an endpoint. Its results are left for the cleanup sweep.
    async fn delete_endpoint(&self, id: Uuid) -> StorageResult<u64>;

    /// All results recorded for an endpoint, newest first
    async fn results_for_endpoint(&self, id: Uuid) -> StorageResult<Vec<MonitoringResult>>;

    /// Total number of stored results, including orphans
    async fn count_results(&self) -> StorageResult<u64>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
