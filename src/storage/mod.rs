//! Lease stores for endpoints and monitoring results
//!
//! This module provides a trait-based abstraction over the durable store
//! shared by all monitoring workers.
//!
//! ## Design
//!
//! - **Trait-based**: `LeaseStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Contention-aware**: Claims are verified by affected-row counts
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, may be shared by processes on one host
//! - **PostgreSQL** (`storage-postgres` feature): `FOR UPDATE SKIP LOCKED` selection
//! - **In-Memory**: No persistence, for testing or single-worker setups
//!
//! ## Usage
//!
//! ```no_run
//! use http_monitoring::storage::{LeaseStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitoring.db").await?;
//!     let health = store.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use backend::{HealthStatus, LeaseStore};
pub use error::{StorageError, StorageResult};
pub use schema::{CheckOutcome, MonitoredEndpoint, MonitoringResult};

/// Open the store selected by the configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn LeaseStore>> {
    match config {
        StorageConfig::None => Ok(Arc::new(memory::MemoryStore::new())),
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(feature = "storage-postgres")]
        StorageConfig::Postgres { url } => Ok(Arc::new(postgres::PostgresStore::new(url).await?)),
        #[cfg(not(feature = "storage-postgres"))]
        StorageConfig::Postgres { .. } => Err(StorageError::InvalidConfig(
            "postgres storage requires the `storage-postgres` feature".to_string(),
        )),
    }
}
