use crate::build::{hook_from_settings, FailureHook};
use crate::config::BaySettings;
use crate::error::Result;
use crate::healthcheck::ReadinessPolicy;
use crate::runtime::{call_runtime, ContainerRuntime, Registry, RetryPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Grace period before a stopping container is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Facts about the host learned during this invocation.
#[derive(Debug, Default)]
pub struct HostState {
    runtime_reachable: Mutex<bool>,
}

impl HostState {
    pub fn runtime_reachable(&self) -> bool {
        *self.runtime_reachable.lock()
    }

    fn mark_reachable(&self) {
        *self.runtime_reachable.lock() = true;
    }

    /// Forget everything cached so far.
    pub fn reset(&self) {
        *self.runtime_reachable.lock() = false;
    }
}

/// Everything one orchestration pass needs, passed in explicitly.
#[derive(Clone)]
pub struct Context {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: Arc<dyn Registry>,
    pub hook: Arc<dyn FailureHook>,
    pub settings: BaySettings,
    pub retry: RetryPolicy,
    pub readiness: ReadinessPolicy,
    pub host: Arc<HostState>,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn Registry>,
        settings: BaySettings,
    ) -> Result<Self> {
        let retry = RetryPolicy::new(settings.transient_retries, settings.runtime_timeout()?);
        let readiness = ReadinessPolicy {
            reset_retries: settings.readiness_reset_retries,
            ..ReadinessPolicy::default()
        };
        Ok(Self {
            runtime,
            registry,
            hook: hook_from_settings(settings.failure_hook.as_deref()),
            settings,
            retry,
            readiness,
            host: Arc::new(HostState::default()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Make sure the runtime answers before the first real call.
    ///
    /// Success is cached in [`HostState`]; failures are not.
    pub async fn ensure_runtime(&self) -> Result<()> {
        if self.host.runtime_reachable() {
            return Ok(());
        }
        call_runtime(&self.retry, "ping", || self.runtime.ping()).await?;
        self.host.mark_reachable();
        Ok(())
    }

    pub async fn stop_container(&self, runtime_name: &str) -> Result<()> {
        tracing::debug!("Stopping {}", runtime_name);
        call_runtime(&self.retry, "stop", || {
            self.runtime.stop(runtime_name, STOP_GRACE)
        })
        .await
    }

    pub async fn remove_container(&self, runtime_name: &str) -> Result<()> {
        tracing::debug!("Removing {}", runtime_name);
        call_runtime(&self.retry, "remove", || self.runtime.remove(runtime_name)).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
