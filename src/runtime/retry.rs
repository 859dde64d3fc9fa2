use super::RuntimeError;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Bounded retry for runtime calls.
///
/// Each attempt is capped by `timeout`. Only transient failures are retried,
/// with exponential backoff from `initial_delay` up to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    /// Single attempt, still bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

/// Run `call` under `policy`, mapping the outcome into the crate error type.
pub async fn call_runtime<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RuntimeError>>,
{
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.attempts {
        let outcome = match timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout {
                operation: operation.to_string(),
                timeout: policy.timeout,
            }),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("'{}' succeeded after {} attempts", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                if attempt == policy.attempts {
                    return Err(Error::RuntimeTransient {
                        attempts: attempt,
                        source: e,
                    });
                }
                tracing::warn!(
                    "'{}' failed transiently (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    policy.attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                delay = std::cmp::min(delay * 2, policy.max_delay);
            }
            Err(e) => return Err(Error::Runtime(e)),
        }
    }

    // attempts >= 1 guarantees the loop returned.
    Err(Error::Runtime(RuntimeError::Other(format!(
        "'{}' was never attempted",
        operation
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            timeout: Duration::from_secs(1),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let value = call_runtime(&fast(3), "inspect", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RuntimeError::ConnectionReset("eof".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_exhausted() {
        let err = call_runtime(&fast(2), "inspect", || async {
            Err::<(), _>(RuntimeError::ConnectionReset("eof".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RuntimeTransient { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let calls = AtomicU32::new(0);
        let err = call_runtime(&fast(5), "build", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RuntimeError::Other("syntax error".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(5),
            ..fast(1)
        };
        let err = call_runtime(&policy, "wait", || async {
            sleep(Duration::from_secs(5)).await;
            Ok::<_, RuntimeError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RuntimeTransient { .. }));
    }
}
