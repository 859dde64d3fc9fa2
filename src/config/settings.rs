//! The `settings:` section.
//!
//! ```yaml
//! settings:
//!   bay:
//!     prefix: shop
//!     strict: false
//!     parallelism: 4
//!     registry: registry.example.com
//!     runtime_timeout: 60s
//!     default_profile: dev
//!   some-plugin:
//!     anything: goes
//! ```
//!
//! `BAY_PROFILE` and `BAY_STRICT` override the file.

use super::parse_duration_field;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PROFILE: &str = "BAY_PROFILE";
pub const ENV_STRICT: &str = "BAY_STRICT";

fn default_prefix() -> String {
    "bay".to_string()
}

fn default_parallelism() -> usize {
    4
}

fn default_runtime_timeout() -> String {
    "60s".to_string()
}

fn default_transient_retries() -> u32 {
    3
}

fn default_reset_retries() -> u32 {
    5
}

fn default_log_tail() -> usize {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaySettings {
    /// Namespace for container, volume and image names.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Escalate validation and dependency warnings to errors.
    #[serde(default)]
    pub strict: bool,

    /// Upper bound on concurrently running build/boot tasks.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Where build output is appended. Defaults to `~/.bay/logs/build.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_log_path: Option<PathBuf>,

    /// Timeout for each individual runtime call.
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout: String,

    /// Attempts for runtime calls that fail transiently.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Immediate retries of a readiness probe after a connection reset.
    #[serde(default = "default_reset_retries")]
    pub readiness_reset_retries: u32,

    /// Lines of build output kept for failure reports.
    #[serde(default = "default_log_tail")]
    pub build_log_tail: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    /// Extra directory of `<name>.yaml` profile files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_dir: Option<PathBuf>,

    /// Shell command run with the failing container and log tail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_hook: Option<String>,
}

impl Default for BaySettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            strict: false,
            parallelism: default_parallelism(),
            registry: None,
            build_log_path: None,
            runtime_timeout: default_runtime_timeout(),
            transient_retries: default_transient_retries(),
            readiness_reset_retries: default_reset_retries(),
            build_log_tail: default_log_tail(),
            default_profile: None,
            profiles_dir: None,
            failure_hook: None,
        }
    }
}

impl BaySettings {
    pub fn runtime_timeout(&self) -> Result<Duration> {
        parse_duration_field("settings.bay.runtime_timeout", &self.runtime_timeout)
    }

    pub fn build_log_path(&self) -> PathBuf {
        self.build_log_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".bay")
                .join("logs")
                .join("build.log")
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime_timeout()?;
        if self.parallelism == 0 {
            return Err(Error::Config(
                "settings.bay.parallelism must be at least 1".to_string(),
            ));
        }
        if self.prefix.is_empty() || self.prefix.contains(char::is_whitespace) {
            return Err(Error::Config(format!(
                "settings.bay.prefix '{}' must be a non-empty name without spaces",
                self.prefix
            )));
        }
        Ok(())
    }

    /// Apply `BAY_STRICT` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_STRICT) {
            self.strict = matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }
}

/// `settings:` holds bay's own section plus opaque sections for plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bay: BaySettings,

    #[serde(flatten)]
    pub plugins: BTreeMap<String, serde_yaml::Value>,
}
