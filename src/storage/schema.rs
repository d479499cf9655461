//! Monitored endpoint and monitoring result definitions
//!
//! ## Persistence Layout
//!
//! Both tables store timestamps (and the check interval) as Unix
//! milliseconds so the same SQL works on SQLite and PostgreSQL. Ids are
//! UUID v4 rendered as text.
//!
//! A result references its endpoint by id only. Deleting an endpoint
//! leaves its results behind as orphans, which the cleanup sweep collects
//! later in bounded batches.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};

/// A user-registered endpoint that is checked periodically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredEndpoint {
    pub id: Uuid,

    /// Owning user. Unique together with `name` and with `url`.
    pub owner_user_id: Uuid,

    pub name: String,

    /// Target of every probe
    pub url: String,

    /// Time between two consecutive checks
    pub monitored_interval: Duration,

    pub created_at: DateTime<Utc>,

    /// The endpoint is due once this instant lies in the past
    pub next_check_at: DateTime<Utc>,
}

impl MonitoredEndpoint {
    /// Create a new endpoint that is due immediately
    pub fn new(
        owner_user_id: Uuid,
        name: impl Into<String>,
        url: impl Into<String>,
        monitored_interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            name: name.into(),
            url: url.into(),
            monitored_interval,
            created_at: now,
            next_check_at: now,
        }
    }

    /// Is the endpoint due for a check at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check_at < now
    }

    /// Next check time after a check that finished at `now`
    ///
    /// Computed from the current instant, not from the previous
    /// `next_check_at`, so slow cycles never stack up.
    pub fn next_check_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        advance(now, self.monitored_interval)
    }
}

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The request completed (any HTTP status)
    Response {
        status_code: u16,
        content_type: Option<String>,
        payload: Option<String>,
    },

    /// The request never produced a response (DNS, connect, timeout, ...)
    Error { message: String },
}

impl CheckOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, CheckOutcome::Error { .. })
    }
}

/// One immutable entry of the result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringResult {
    pub id: Uuid,

    /// Wall-clock time at which the probe started
    pub checked_at: DateTime<Utc>,

    pub outcome: CheckOutcome,

    /// URL the probe actually used. May differ from the endpoint's current
    /// URL if it was edited later.
    pub url: String,

    /// Weak reference; the endpoint may have been deleted since
    pub monitored_endpoint_id: Uuid,
}

impl MonitoringResult {
    /// Build a fresh result for `endpoint`
    pub fn new(endpoint: &MonitoredEndpoint, checked_at: DateTime<Utc>, outcome: CheckOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            checked_at,
            outcome,
            url: endpoint.url.clone(),
            monitored_endpoint_id: endpoint.id,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            CheckOutcome::Response { status_code, .. } => Some(*status_code),
            CheckOutcome::Error { .. } => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.outcome {
            CheckOutcome::Response { content_type, .. } => content_type.as_deref(),
            CheckOutcome::Error { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match &self.outcome {
            CheckOutcome::Response { payload, .. } => payload.as_deref(),
            CheckOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CheckOutcome::Error { message } => Some(message),
            CheckOutcome::Response { .. } => None,
        }
    }
}

/// Add a std duration to a timestamp, saturating at the maximum instant
pub fn advance(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn parse_uuid(value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::SerializationError(format!("invalid id '{value}': {e}")))
}

/// Raw `monitored_endpoints` row as decoded by sqlx
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EndpointRecord {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub url: String,
    pub monitored_interval_ms: i64,
    pub created_at: i64,
    pub next_check_at: i64,
}

impl TryFrom<EndpointRecord> for MonitoredEndpoint {
    type Error = StorageError;

    fn try_from(record: EndpointRecord) -> StorageResult<Self> {
        Ok(Self {
            id: parse_uuid(&record.id)?,
            owner_user_id: parse_uuid(&record.owner_user_id)?,
            name: record.name,
            url: record.url,
            monitored_interval: Duration::from_millis(
                u64::try_from(record.monitored_interval_ms).unwrap_or_default(),
            ),
            created_at: millis_to_timestamp(record.created_at),
            next_check_at: millis_to_timestamp(record.next_check_at),
        })
    }
}

/// Raw `monitoring_results` row as decoded by sqlx
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ResultRecord {
    pub id: String,
    pub checked_at: i64,
    pub status_code: Option<i32>,
    pub content_type: Option<String>,
    pub payload: Option<String>,
    pub error: Option<String>,
    pub url: String,
    pub monitored_endpoint_id: String,
}

impl TryFrom<ResultRecord> for MonitoringResult {
    type Error = StorageError;

    fn try_from(record: ResultRecord) -> StorageResult<Self> {
        let outcome = match (record.status_code, record.error) {
            (Some(code), None) => CheckOutcome::Response {
                status_code: u16::try_from(code).map_err(|_| {
                    StorageError::SerializationError(format!("invalid status code {code}"))
                })?,
                content_type: record.content_type,
                payload: record.payload,
            },
            (None, Some(message)) => CheckOutcome::Error { message },
            _ => {
                return Err(StorageError::SerializationError(format!(
                    "result {} must carry exactly one of status code and error",
                    record.id
                )));
            }
        };

        Ok(Self {
            id: parse_uuid(&record.id)?,
            checked_at: millis_to_timestamp(record.checked_at),
            outcome,
            url: record.url,
            monitored_endpoint_id: parse_uuid(&record.monitored_endpoint_id)?,
        })
    }
}

/// Column values of a result, flattened for binding
pub(crate) struct ResultColumns<'a> {
    pub status_code: Option<i32>,
    pub content_type: Option<&'a str>,
    pub payload: Option<&'a str>,
    pub error: Option<&'a str>,
}

impl<'a> From<&'a CheckOutcome> for ResultColumns<'a> {
    fn from(outcome: &'a CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::Response {
                status_code,
                content_type,
                payload,
            } => Self {
                status_code: Some(i32::from(*status_code)),
                content_type: content_type.as_deref(),
                payload: payload.as_deref(),
                error: None,
            },
            CheckOutcome::Error { message } => Self {
                status_code: None,
                content_type: None,
                payload: None,
                error: Some(message),
            },
        }
    }
}
