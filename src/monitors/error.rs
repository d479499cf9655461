//! Failure taxonomy of the monitoring loops
//!
//! None of these errors reach a caller. Each one ends the current attempt,
//! is logged, and heals on the next scheduled cycle.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum MonitorError {
    /// The candidate was claimed, rescheduled or deleted by someone else
    /// between selection and verification
    ClaimLost { endpoint: Uuid },

    /// The probe did not finish within its time budget
    ProbeTimeout { timeout: Duration },

    /// The probe failed before a response was received
    ProbeNetworkError(String),

    /// Writing a result or its reschedule failed
    PersistenceFailure { endpoint: Uuid, source: StorageError },

    /// Deleting a batch of orphaned results failed
    CleanupBatchFailure(StorageError),

    /// Selecting a due endpoint failed
    ClaimSelectionFailure(StorageError),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::ClaimLost { endpoint } => {
                write!(f, "claim on endpoint {} lost to a concurrent worker", endpoint)
            }
            MonitorError::ProbeTimeout { timeout } => {
                write!(f, "request timed out after {} ms", timeout.as_millis())
            }
            MonitorError::ProbeNetworkError(msg) => write!(f, "request failed: {}", msg),
            MonitorError::PersistenceFailure { endpoint, source } => {
                write!(f, "failed to persist result of endpoint {}: {}", endpoint, source)
            }
            MonitorError::CleanupBatchFailure(err) => {
                write!(f, "failed to delete orphaned results: {}", err)
            }
            MonitorError::ClaimSelectionFailure(err) => {
                write!(f, "failed to select a due endpoint: {}", err)
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::PersistenceFailure { source, .. } => Some(source),
            MonitorError::CleanupBatchFailure(err) | MonitorError::ClaimSelectionFailure(err) => {
                Some(err)
            }
            _ => None,
        }
    }
}

/// Render an error together with its chain of sources
pub(crate) fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
