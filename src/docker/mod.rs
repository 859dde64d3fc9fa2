//! Docker CLI backend.
//!
//! [`DockerClient`] implements [`crate::runtime::ContainerRuntime`] and
//! [`crate::runtime::Registry`] by shelling out to `docker`.

pub mod client;
pub mod error;

pub use client::DockerClient;
pub use error::DockerError;

use std::time::Duration;

/// Check Docker daemon health with retry and exponential backoff.
///
/// The daemon may be briefly unavailable while starting or restarting, and a
/// single check creates false negatives. Backoff runs 100ms, 200ms, 400ms...
/// capped at 2s, until `max_attempts` or `total_timeout` is reached.
pub async fn check_daemon_with_retry(
    client: &DockerClient,
    max_attempts: u32,
    total_timeout: Duration,
) -> bool {
    use tokio::time::{sleep, timeout};

    let start = std::time::Instant::now();
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=max_attempts {
        if start.elapsed() >= total_timeout {
            tracing::debug!(
                "Docker daemon health check timeout after {:?}",
                start.elapsed()
            );
            return false;
        }

        let remaining = total_timeout.saturating_sub(start.elapsed());
        let probe_timeout = remaining.min(Duration::from_secs(2));
        match timeout(remaining, client.daemon_healthy(probe_timeout)).await {
            Ok(true) => {
                if attempt > 1 {
                    tracing::info!(
                        "Docker daemon became healthy after {} attempts ({:?})",
                        attempt,
                        start.elapsed()
                    );
                }
                return true;
            }
            Ok(false) | Err(_) => {
                if attempt < max_attempts {
                    tracing::debug!(
                        "Docker daemon not ready (attempt {}/{}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(2));
                }
            }
        }
    }

    tracing::warn!(
        "Docker daemon unavailable after {} attempts ({:?})",
        max_attempts,
        start.elapsed()
    );
    false
}
