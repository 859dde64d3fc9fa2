//! Readiness probe configuration.

use super::parse_duration_string;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time a container gets to become ready.
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Readiness probe for a container.
///
/// ```yaml
/// # HTTP GET against a published port
/// readiness:
///   httpGet: "http://localhost:8080/health"
///   timeout: "30s"
///
/// # Command executed inside the container
/// readiness:
///   command: "pg_isready -U postgres"
///   timeout: "45s"
///
/// # Short form, default timeout
/// readiness: "pg_isready -U postgres"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadinessProbe {
    HttpGet {
        #[serde(rename = "httpGet")]
        http_get: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<String>,
    },
    CommandMap {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<String>,
    },
    Command(String),
}

impl ReadinessProbe {
    pub fn http_url(&self) -> Option<&str> {
        match self {
            ReadinessProbe::HttpGet { http_get, .. } => Some(http_get),
            _ => None,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            ReadinessProbe::CommandMap { command, .. } => Some(command),
            ReadinessProbe::Command(cmd) => Some(cmd),
            ReadinessProbe::HttpGet { .. } => None,
        }
    }

    fn raw_timeout(&self) -> Option<&str> {
        match self {
            ReadinessProbe::HttpGet { timeout, .. } | ReadinessProbe::CommandMap { timeout, .. } => {
                timeout.as_deref()
            }
            ReadinessProbe::Command(_) => None,
        }
    }

    /// Configured timeout, or 60 seconds.
    ///
    /// Malformed values are rejected by validation, so parsing here only
    /// falls back when nothing was configured.
    pub fn timeout(&self) -> Duration {
        self.raw_timeout()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_READINESS_TIMEOUT)
    }

    /// Validation hook for the raw timeout string.
    pub fn timeout_is_valid(&self) -> bool {
        self.raw_timeout()
            .map(|t| parse_duration_string(t).is_some())
            .unwrap_or(true)
    }
}
