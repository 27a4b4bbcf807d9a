//! Probe execution and outcome classification.
//!
//! A probe is one HTTP request against one endpoint configuration. Every
//! invocation yields an [`Outcome`]: a down endpoint is a normal result, not
//! an engine error.

mod classify;
mod http;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::endpoint::{Endpoint, EndpointId, NewLog};

pub use classify::FailureCategory;
pub use http::HttpProber;

/// Upper bound for any single probe
pub const DEFAULT_TIMEOUT_CEILING: Duration = Duration::from_secs(15);

/// Share of the interval (4/5) a probe may use before it is cut off
const INTERVAL_TIMEOUT_NUMERATOR: u32 = 4;
const INTERVAL_TIMEOUT_DENOMINATOR: u32 = 5;

/// Error message recorded for probes that hit their deadline
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Request timeout for an endpoint probed every `interval`.
///
/// Always strictly shorter than the interval, and never above `ceiling`.
pub fn probe_timeout(interval: Duration, ceiling: Duration) -> Duration {
    (interval * INTERVAL_TIMEOUT_NUMERATOR / INTERVAL_TIMEOUT_DENOMINATOR).min(ceiling)
}

/// Classified result of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { status_code: u16, latency: Duration },
    StatusMismatch { expected: u16, actual: u16, latency: Duration },
    Timeout { latency: Duration },
    NetworkFailure { category: FailureCategory, latency: Duration },
}

impl Outcome {
    /// Compare an observed status code against the expected one
    pub fn from_status(expected: u16, actual: u16, latency: Duration) -> Self {
        if actual == expected {
            Outcome::Success { status_code: actual, latency }
        } else {
            Outcome::StatusMismatch { expected, actual, latency }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Outcome::Success { status_code, .. } => Some(*status_code),
            Outcome::StatusMismatch { actual, .. } => Some(*actual),
            Outcome::Timeout { .. } | Outcome::NetworkFailure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::StatusMismatch { expected, actual, .. } => {
                Some(format!("expected {expected}, got {actual}"))
            }
            Outcome::Timeout { .. } => Some(TIMEOUT_MESSAGE.to_string()),
            Outcome::NetworkFailure { category, .. } => Some(category.as_str().to_string()),
        }
    }

    pub fn latency(&self) -> Duration {
        match self {
            Outcome::Success { latency, .. }
            | Outcome::StatusMismatch { latency, .. }
            | Outcome::Timeout { latency }
            | Outcome::NetworkFailure { latency, .. } => *latency,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency().as_micros() as f64 / 1000.0
    }

    pub fn to_new_log(&self, endpoint_id: EndpointId, created_at: DateTime<Utc>) -> NewLog {
        NewLog {
            endpoint_id,
            status_code: self.status_code(),
            success: self.is_success(),
            latency_ms: self.latency_ms(),
            error_message: self.error_message(),
            created_at,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_message() {
            None => write!(f, "ok ({:.1} ms)", self.latency_ms()),
            Some(message) => write!(f, "failed: {message} ({:.1} ms)", self.latency_ms()),
        }
    }
}

/// Executes one probe against one endpoint
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> Outcome;
}
