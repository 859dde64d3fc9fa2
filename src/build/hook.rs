use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;

/// Notified when a container's build fails.
///
/// Hooks are informational: a failing hook is logged and never changes the
/// outcome of the build pass.
#[async_trait]
pub trait FailureHook: Send + Sync {
    async fn on_failure(&self, container: &str, log_tail: &[String]);
}

pub struct NoopHook;

#[async_trait]
impl FailureHook for NoopHook {
    async fn on_failure(&self, _container: &str, _log_tail: &[String]) {}
}

/// Runs `settings.bay.failure_hook` through `sh -c`.
///
/// The hook sees `BAY_CONTAINER` and `BAY_LOG_TAIL` (newline-joined).
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl FailureHook for CommandHook {
    async fn on_failure(&self, container: &str, log_tail: &[String]) {
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("BAY_CONTAINER", container)
            .env("BAY_LOG_TAIL", log_tail.join("\n"))
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tracing::debug!("Failure hook ran for '{}'", container);
            }
            Ok(status) => {
                tracing::warn!("Failure hook for '{}' exited with {}", container, status);
            }
            Err(e) => {
                tracing::warn!("Failed to run failure hook for '{}': {}", container, e);
            }
        }
    }
}

/// The hook configured in settings, or a no-op.
pub fn hook_from_settings(command: Option<&str>) -> Arc<dyn FailureHook> {
    match command {
        Some(cmd) if !cmd.trim().is_empty() => Arc::new(CommandHook::new(cmd)),
        _ => Arc::new(NoopHook),
    }
}
