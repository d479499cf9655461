//! Distributed HTTP endpoint monitoring
//!
//! Any number of workers share one store. Each worker repeatedly claims the
//! endpoint that has been due the longest, probes it with a bounded GET,
//! records the outcome and reschedules it. A separate loop purges results
//! whose endpoint has been deleted.

pub mod actors;
pub mod config;
pub mod monitors;
pub mod storage;
