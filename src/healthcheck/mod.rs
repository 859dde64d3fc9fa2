//! Readiness probes.

mod checker;
mod command;
mod http;

pub use checker::*;
pub use command::ContainerCommandChecker;
pub use http::HttpChecker;

use crate::config::ReadinessProbe;
use crate::error::Result;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;

/// Build the checker for a container's configured probe.
pub fn checker_for(
    probe: &ReadinessProbe,
    runtime: Arc<dyn ContainerRuntime>,
    runtime_name: &str,
) -> Result<Box<dyn HealthChecker>> {
    if let Some(url) = probe.http_url() {
        return Ok(Box::new(HttpChecker::new(url.to_string(), probe.timeout())?));
    }
    let command = probe.command().unwrap_or("true").to_string();
    Ok(Box::new(ContainerCommandChecker::new(
        runtime,
        runtime_name.to_string(),
        command,
        probe.timeout(),
    )))
}
