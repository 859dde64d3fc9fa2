use std::fmt;
use std::time::Duration;

/// Structured error for Docker CLI invocations.
#[derive(Debug)]
pub enum DockerError {
    /// The command did not finish in time.
    Timeout { command: String, timeout: Duration },

    /// The command ran and exited non-zero.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The `docker` binary could not be executed.
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// Output that bay could not make sense of.
    UnexpectedOutput { command: String, detail: String },

    /// The daemon did not answer `docker info`.
    DaemonUnavailable,
}

impl DockerError {
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Build a `CommandFailed` from a finished process.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    pub fn cmd_failed(
        cmd: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    pub fn unexpected(cmd: impl Into<String>, detail: impl Into<String>) -> Self {
        DockerError::UnexpectedOutput {
            command: cmd.into(),
            detail: detail.into(),
        }
    }

    /// Whether stderr says the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            DockerError::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("no such") || stderr.contains("not found")
            }
            _ => false,
        }
    }
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::Timeout { command, timeout } => write!(
                f,
                "Timed out running '{}' (exceeded {} seconds)",
                command,
                timeout.as_secs()
            ),
            DockerError::CommandFailed {
                command,
                stderr,
                exit_code: Some(code),
            } => write!(f, "'{}' failed (exit code {}): {}", command, code, stderr),
            DockerError::CommandFailed {
                command, stderr, ..
            } => write!(f, "'{}' failed: {}", command, stderr),
            DockerError::ExecFailed { command, source } => {
                write!(f, "Failed to execute '{}': {}", command, source)
            }
            DockerError::UnexpectedOutput { command, detail } => {
                write!(f, "Unexpected output from '{}': {}", command, detail)
            }
            DockerError::DaemonUnavailable => write!(f, "Docker daemon is not responding"),
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(DockerError::cmd_failed("docker inspect x", "Error: No such object: x", Some(1))
            .is_not_found());
        assert!(!DockerError::cmd_failed("docker run", "port is already allocated", Some(125))
            .is_not_found());
    }

    #[test]
    fn test_display_includes_exit_code() {
        let err = DockerError::cmd_failed("docker stop web", "boom", Some(2));
        assert_eq!(err.to_string(), "'docker stop web' failed (exit code 2): boom");
    }
}
