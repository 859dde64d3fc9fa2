use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of a single readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Ready,
    /// Reachable but not ready yet, or not reachable at all.
    NotReady(String),
    /// The connection was reset mid-probe. Worth retrying at once.
    Reset(String),
}

/// Readiness checker for a container.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self) -> Result<Probe>;

    /// Overall time the container gets to become ready.
    fn timeout(&self) -> Duration;
}

/// Backoff knobs for [`wait_until_ready`].
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub reset_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            reset_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Probe until ready, the checker's timeout expires, or `cancel` fires.
///
/// Connection resets are retried immediately, up to `reset_retries` in a row.
/// Anything else backs off exponentially.
pub async fn wait_until_ready<C: HealthChecker + ?Sized>(
    container: &str,
    checker: &C,
    policy: &ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + checker.timeout();
    let mut delay = policy.initial_delay;
    let mut resets = 0;
    let mut last = String::from("no probe completed");

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(container.to_string()));
        }

        match checker.check().await {
            Ok(Probe::Ready) => return Ok(()),
            Ok(Probe::Reset(reason)) if resets < policy.reset_retries => {
                resets += 1;
                tracing::debug!(
                    "Readiness probe for '{}' reset ({}/{}): {}",
                    container,
                    resets,
                    policy.reset_retries,
                    reason
                );
                if Instant::now() < deadline {
                    continue;
                }
                last = reason;
            }
            Ok(Probe::Reset(reason)) | Ok(Probe::NotReady(reason)) => {
                resets = 0;
                last = reason;
            }
            Err(e) => {
                resets = 0;
                last = e.to_string();
            }
        }

        if Instant::now() + delay > deadline {
            return Err(Error::HealthCheckFailed(
                container.to_string(),
                format!(
                    "not ready after {}s (last probe: {})",
                    checker.timeout().as_secs(),
                    last
                ),
            ));
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled(container.to_string())),
        }
        delay = std::cmp::min(delay * 2, policy.max_delay);
    }
}

/// Whether an error chain bottoms out in a reset connection.
pub fn is_connection_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        if e.to_string().to_lowercase().contains("connection reset") {
            return true;
        }
        current = e.source();
    }
    false
}
