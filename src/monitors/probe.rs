//! Probe executor - one timed, size-bounded GET per claimed endpoint
//!
//! ## Outcome Rules
//!
//! - Any HTTP response, whatever its status, is a `Response` outcome
//! - DNS, connection and transport failures are `Error` outcomes
//! - Exceeding the time budget (connect, headers and body together) is an
//!   `Error` outcome and nothing read so far is kept
//! - Only the first `max_payload_bytes` of a body are read; the remainder is
//!   never pulled off the socket
//!
//! Probes never retry. A failing endpoint is simply checked again on its
//! next due cycle.

use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, trace, warn};

use crate::storage::{CheckOutcome, MonitoredEndpoint};

use super::error::{MonitorError, describe};

/// Result of one probe, ready to be recorded
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Wall-clock time at which the request was started
    pub checked_at: DateTime<Utc>,

    pub outcome: CheckOutcome,

    /// How long the probe took
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }
}

/// Accumulates a response body up to a fixed number of bytes
#[derive(Debug)]
pub struct BoundedBody {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl BoundedBody {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
        }
    }

    /// Append a chunk, keeping at most `cap` bytes in total
    ///
    /// Returns `false` once the cap is reached and further chunks would be
    /// discarded anyway.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.cap - self.buf.len();
        if chunk.len() > room {
            self.buf.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(chunk);
        }
        self.buf.len() < self.cap
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The buffered bytes as text; `None` for an empty body
    pub fn into_payload(self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.buf).into_owned())
    }
}

struct ProbeResponse {
    status_code: u16,
    content_type: Option<String>,
    body: BoundedBody,
}

/// Executes probes with a shared HTTP client
pub struct Prober {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,

    timeout: Duration,

    max_payload_bytes: usize,
}

impl Prober {
    pub fn new(timeout: Duration, max_payload_bytes: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("http-monitoring/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            timeout,
            max_payload_bytes,
        })
    }

    /// Check one endpoint
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.id, url = %endpoint.url))]
    pub async fn probe(&self, endpoint: &MonitoredEndpoint) -> ProbeOutcome {
        let checked_at = Utc::now();
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.execute_request(&endpoint.url)).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::ProbeTimeout {
                timeout: self.timeout,
            }),
        };
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(response) => {
                debug!(
                    "endpoint answered {} in {} ms ({} bytes{})",
                    response.status_code,
                    elapsed.as_millis(),
                    response.body.len(),
                    if response.body.is_truncated() { ", truncated" } else { "" }
                );
                CheckOutcome::Response {
                    status_code: response.status_code,
                    content_type: response.content_type,
                    payload: response.body.into_payload(),
                }
            }
            Err(e) => {
                warn!("failed to check endpoint {}: {}", endpoint.id, e);
                CheckOutcome::Error {
                    message: e.to_string(),
                }
            }
        };

        ProbeOutcome {
            checked_at,
            outcome,
            elapsed,
        }
    }

    async fn execute_request(&self, url: &str) -> Result<ProbeResponse, MonitorError> {
        trace!("requesting {url}");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitorError::ProbeNetworkError(describe(&e)))?;

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = BoundedBody::new(self.max_payload_bytes);
        if self.max_payload_bytes > 0 {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| MonitorError::ProbeNetworkError(describe(&e)))?
            {
                if !body.push(&chunk) {
                    break;
                }
            }
        }

        Ok(ProbeResponse {
            status_code,
            content_type,
            body,
        })
    }
}
