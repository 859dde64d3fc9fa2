use super::{is_connection_reset, HealthChecker, Probe};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Shared client so many probes reuse one connection pool.
///
/// Individual requests carry their own timeout.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn shared_client() -> Result<Client> {
    if let Some(client) = SHARED_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
    Ok(SHARED_HTTP_CLIENT.get_or_init(|| client).clone())
}

/// HTTP GET readiness probe. Any 2xx response means ready.
pub struct HttpChecker {
    url: String,
    client: Client,
    timeout: Duration,
    request_timeout: Duration,
}

impl HttpChecker {
    /// # Errors
    ///
    /// Returns error if URL is malformed or uses unsupported scheme.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        Self::validate_url(&url)?;

        Ok(Self {
            url,
            client: shared_client()?,
            timeout,
            request_timeout: timeout.min(Duration::from_secs(5)),
        })
    }

    /// Validate that a URL is well-formed and uses HTTP/HTTPS scheme.
    pub fn validate_url(url: &str) -> Result<()> {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let scheme = parsed.scheme();
                if scheme != "http" && scheme != "https" {
                    return Err(Error::Config(format!(
                        "Invalid readiness URL '{}': scheme must be http or https, got '{}'",
                        url, scheme
                    )));
                }
                Ok(())
            }
            Err(e) => Err(Error::Config(format!(
                "Invalid readiness URL '{}': {}",
                url, e
            ))),
        }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self) -> Result<Probe> {
        match self
            .client
            .get(&self.url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(Probe::Ready),
            Ok(response) => Ok(Probe::NotReady(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            ))),
            Err(e) if is_connection_reset(&e) => Ok(Probe::Reset(e.to_string())),
            Err(e) => Ok(Probe::NotReady(e.to_string())),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_port_is_not_ready() {
        let checker = HttpChecker::new(
            "http://127.0.0.1:59999/health".to_string(),
            Duration::from_secs(1),
        )
        .expect("Should create HTTP checker");

        assert!(matches!(checker.check().await.unwrap(), Probe::NotReady(_)));
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(HttpChecker::new("not-a-url".to_string(), Duration::from_secs(1)).is_err());
        assert!(
            HttpChecker::new("ftp://localhost/health".to_string(), Duration::from_secs(1))
                .is_err()
        );
        assert!(
            HttpChecker::new("https://localhost/health".to_string(), Duration::from_secs(1))
                .is_ok()
        );
    }
}
