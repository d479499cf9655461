use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::level_filters::LevelFilter;
use tracing::{trace, warn};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence, single worker only)
    #[serde(rename = "none")]
    None,

    /// SQLite database file (default)
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },

    /// PostgreSQL database (requires the `storage-postgres` feature)
    Postgres { url: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

/// Settings of the claim/probe/record loop
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Run the monitoring loop at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay between two claim sweeps
    #[serde(default = "default_task_delay_ms")]
    pub delay_ms: u64,

    /// Hard limit for one probe, including reading the body
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Maximum number of claimed endpoints in flight per sweep
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How far a claim pushes `next_check_at` before the probe runs
    #[serde(default = "default_claim_grace_secs")]
    pub claim_grace_secs: u64,

    /// Response bytes kept per probe; the rest is never read
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl SchedulerConfig {
    /// Pause between sweeps, never shorter than 1 ms
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn claim_grace(&self) -> Duration {
        Duration::from_secs(self.claim_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            delay_ms: default_task_delay_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            concurrency: default_concurrency(),
            claim_grace_secs: default_claim_grace_secs(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

/// Settings of the orphaned-result cleanup loop
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay between two cleanup sweeps
    #[serde(default = "default_task_delay_ms")]
    pub delay_ms: u64,

    /// Maximum number of results deleted per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl CleanupConfig {
    /// Pause between sweeps, never shorter than 1 ms
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.max(1))
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            delay_ms: default_task_delay_ms(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_enabled() -> bool {
    true
}

fn default_task_delay_ms() -> u64 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    10
}

fn default_claim_grace_secs() -> u64 {
    60
}

fn default_max_payload_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_batch_size() -> usize {
    10_000
}

const MONITORING_STORAGE: &str = "MONITORING_STORAGE";
const MONITORING_DATABASE: &str = "MONITORING_DATABASE";
const MONITORING_SCHEDULING_ENABLED: &str = "MONITORING_SCHEDULING_ENABLED";
const MONITORING_TASK_DELAY_MS: &str = "MONITORING_TASK_DELAY_MS";
const MONITORING_PROBE_TIMEOUT_MS: &str = "MONITORING_PROBE_TIMEOUT_MS";
const MONITORING_CONCURRENCY: &str = "MONITORING_CONCURRENCY";
const MONITORING_CLAIM_GRACE_SECS: &str = "MONITORING_CLAIM_GRACE_SECS";
const MONITORING_MAX_PAYLOAD_BYTES: &str = "MONITORING_MAX_PAYLOAD_BYTES";
const CLEANUP_ENABLED: &str = "CLEANUP_ENABLED";
const CLEANUP_TASK_DELAY_MS: &str = "CLEANUP_TASK_DELAY_MS";
const CLEANUP_BATCH_SIZE: &str = "CLEANUP_BATCH_SIZE";
const MONITORING_LOG_LEVEL: &str = "MONITORING_LOG_LEVEL";

/// Read `key` from the environment, falling back to `default` when unset
/// or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparsable value '{raw}' for {key}");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    /// Build the configuration from environment variables
    pub fn from_env() -> Self {
        let database = std::env::var(MONITORING_DATABASE).ok();
        let storage = match std::env::var(MONITORING_STORAGE).as_deref() {
            Ok("none") => StorageConfig::None,
            Ok("postgres") => StorageConfig::Postgres {
                url: database.unwrap_or_default(),
            },
            _ => StorageConfig::Sqlite {
                path: database.map(PathBuf::from).unwrap_or_else(default_sqlite_path),
            },
        };

        let config = Self {
            storage,
            scheduler: SchedulerConfig {
                enabled: env_or(MONITORING_SCHEDULING_ENABLED, default_enabled()),
                delay_ms: env_or(MONITORING_TASK_DELAY_MS, default_task_delay_ms()),
                probe_timeout_ms: env_or(MONITORING_PROBE_TIMEOUT_MS, default_probe_timeout_ms()),
                concurrency: env_or(MONITORING_CONCURRENCY, default_concurrency()),
                claim_grace_secs: env_or(MONITORING_CLAIM_GRACE_SECS, default_claim_grace_secs()),
                max_payload_bytes: env_or(MONITORING_MAX_PAYLOAD_BYTES, default_max_payload_bytes()),
            },
            cleanup: CleanupConfig {
                enabled: env_or(CLEANUP_ENABLED, default_enabled()),
                delay_ms: env_or(CLEANUP_TASK_DELAY_MS, default_task_delay_ms()),
                batch_size: env_or(CLEANUP_BATCH_SIZE, default_batch_size()),
            },
        };

        trace!("loaded config from environment: {config:?}");
        config
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.concurrency == 0 {
            anyhow::bail!("scheduler concurrency must be at least 1");
        }
        if self.scheduler.delay_ms == 0 {
            anyhow::bail!("scheduler delay must be at least 1 ms");
        }
        if self.scheduler.probe_timeout_ms == 0 {
            anyhow::bail!("probe timeout must be positive");
        }
        if self.cleanup.delay_ms == 0 {
            anyhow::bail!("cleanup delay must be at least 1 ms");
        }
        if self.cleanup.batch_size == 0 {
            anyhow::bail!("cleanup batch size must be at least 1");
        }
        if matches!(&self.storage, StorageConfig::Postgres { url } if url.is_empty()) {
            anyhow::bail!("postgres storage needs a database url");
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

/// Log level for this crate and the worker binary
pub fn log_level() -> LevelFilter {
    env_or(MONITORING_LOG_LEVEL, LevelFilter::INFO)
}
