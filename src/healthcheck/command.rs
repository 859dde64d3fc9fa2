use super::{HealthChecker, Probe};
use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Runs a shell command inside the container; exit 0 means ready.
pub struct ContainerCommandChecker {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    command: String,
    timeout: Duration,
}

impl ContainerCommandChecker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container: String,
        command: String,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            container,
            command,
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for ContainerCommandChecker {
    async fn check(&self) -> Result<Probe> {
        match self.runtime.exec(&self.container, &self.command).await {
            Ok(0) => Ok(Probe::Ready),
            Ok(code) => Ok(Probe::NotReady(format!(
                "'{}' exited with {}",
                self.command, code
            ))),
            Err(e) if e.is_transient() => Ok(Probe::Reset(e.to_string())),
            Err(e) => Err(Error::Runtime(e)),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
