//! Endpoint configuration checks applied at registry-write time.
//!
//! Endpoints that fail these checks never reach the scheduler.

use thiserror::Error;
use url::Url;

use crate::endpoint::Endpoint;

/// Smallest interval the engine accepts. Registry writers may impose a larger one.
pub const MIN_INTERVAL_SECONDS: u32 = 1;

const MAX_URL_LENGTH: usize = 2048;
const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("interval_seconds must be at least {min} seconds")]
    IntervalTooShort { min: u32, actual: u32 },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid scheme '{0}', must be http or https")]
    UnsupportedScheme(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("expected_status must be between 100 and 599, got {0}")]
    InvalidStatus(u16),

    #[error("name cannot be empty")]
    EmptyName,

    #[error("{field} is too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },
}

/// Validate an http(s) target url
pub fn validate_url(target: &str) -> Result<(), ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::InvalidUrl("url cannot be empty".to_string()));
    }
    if target.len() > MAX_URL_LENGTH {
        return Err(ValidationError::TooLong { field: "url", max: MAX_URL_LENGTH });
    }

    let url = Url::parse(target).map_err(|e| {
        if target.contains("://") {
            ValidationError::InvalidUrl(e.to_string())
        } else {
            ValidationError::InvalidUrl("url must include scheme (http:// or https://)".to_string())
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidUrl("url must have a valid host".to_string()));
    }

    Ok(())
}

pub fn validate_interval(interval_seconds: u32, min: u32) -> Result<(), ValidationError> {
    let min = min.max(MIN_INTERVAL_SECONDS);
    if interval_seconds < min {
        return Err(ValidationError::IntervalTooShort { min, actual: interval_seconds });
    }
    Ok(())
}

pub fn validate_expected_status(status: u16) -> Result<(), ValidationError> {
    if !(100..=599).contains(&status) {
        return Err(ValidationError::InvalidStatus(status));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong { field: "name", max: MAX_NAME_LENGTH });
    }
    Ok(())
}

/// Validate every user-supplied field of an endpoint
pub fn validate_endpoint(endpoint: &Endpoint, min_interval: u32) -> Result<(), ValidationError> {
    validate_name(&endpoint.name)?;
    validate_url(&endpoint.url)?;
    validate_expected_status(endpoint.expected_status)?;
    validate_interval(endpoint.interval_seconds, min_interval)
}

/// The subset the engine itself relies on: a probe-able url and a positive interval
pub fn validate_schedulable(endpoint: &Endpoint) -> Result<(), ValidationError> {
    validate_url(&endpoint.url)?;
    validate_interval(endpoint.interval_seconds, MIN_INTERVAL_SECONDS)
}
