// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::runtime::RuntimeError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(bay::config::error),
        help("Check the containers, volumes and profiles sections of your bay.yaml")
    )]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Container not found: {0}")]
    #[diagnostic(
        code(bay::container::not_found),
        help("List the declared containers with `bay graph`")
    )]
    ContainerNotFound(String),

    #[error("Profile '{profile}' could not be resolved: {reason}")]
    #[diagnostic(
        code(bay::profile::resolution),
        help("Check the `parent` fields of your profiles")
    )]
    ProfileResolution { profile: String, reason: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(bay::dependency::circular),
        help("Containers cannot require each other in a cycle. Review the required links, mounts and providers")
    )]
    DependencyCycle(Vec<String>),

    #[error("Container '{container}' has a required link to '{target}', which is not defined")]
    #[diagnostic(
        code(bay::dependency::unresolved_link),
        help("Declare '{target}' under `containers:` or move the link to `optional:`")
    )]
    UnresolvedLink { container: String, target: String },

    #[error("Build of '{container}' failed: {reason}")]
    #[diagnostic(code(bay::build::failed))]
    Build {
        container: String,
        reason: String,
        log_tail: Vec<String>,
    },

    #[error("Transient runtime fault after {attempts} attempt(s): {source}")]
    #[diagnostic(
        code(bay::runtime::transient),
        help("The container daemon dropped a connection. Retry the command")
    )]
    RuntimeTransient {
        attempts: u32,
        #[source]
        source: RuntimeError,
    },

    #[error("Runtime error: {0}")]
    #[diagnostic(
        code(bay::runtime::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Runtime(#[source] RuntimeError),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Volume '{volume}' is in use by {}", .blockers.join(", "))]
    #[diagnostic(
        code(bay::volume::in_use),
        help("Stop the blocking containers first, then retry")
    )]
    VolumeInUse {
        volume: String,
        blockers: Vec<String>,
    },

    #[error("Container '{0}' readiness check failed: {1}")]
    #[diagnostic(
        code(bay::boot::not_ready),
        help("Check the container logs with `bay tail {0}`\nVerify the readiness probe in your config")
    )]
    HealthCheckFailed(String, String),

    #[error("Timeout waiting for container '{0}'")]
    Timeout(String),

    #[error("Operation cancelled for container '{0}'")]
    Cancelled(String),

    #[error("Skipped '{container}' because its dependency '{dependency}' failed")]
    DependencyFailed {
        container: String,
        dependency: String,
    },

    #[error("Warning escalated to error: {0}")]
    #[diagnostic(
        code(bay::strict),
        help("Strict mode is enabled (settings.bay.strict or BAY_STRICT=1)")
    )]
    Strict(String),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime(e)
    }
}

impl Error {
    /// Collapse a list of subtree failures into one error.
    ///
    /// Returns `Ok(())` for an empty list and the bare error for a single one.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ContainerNotFound(name) => Some(format!(
                "'{}' is not declared. Run `bay graph` to see the containers in this formation.",
                name
            )),
            Error::ProfileResolution { .. } => {
                Some("List the available profiles with `bay profiles`.".to_string())
            }
            Error::DependencyCycle(path) => Some(format!(
                "Break the cycle by turning one of these links into an optional link: {}",
                path.join(", ")
            )),
            Error::UnresolvedLink { container, target } => Some(format!(
                "Either declare a container named '{}' or remove it from the links of '{}'.",
                target, container
            )),
            Error::Build { log_tail, .. } if log_tail.is_empty() => {
                Some("The build produced no output. Check the build context path.".to_string())
            }
            Error::VolumeInUse { blockers, .. } => Some(format!(
                "Stop {} first, e.g. `bay stop {}`.",
                blockers.join(", "),
                blockers.join(" ")
            )),
            Error::HealthCheckFailed(container, _) => Some(format!(
                "Check the container logs with: bay tail {}",
                container
            )),
            Error::Runtime(_) | Error::RuntimeTransient { .. } => {
                Some("Check that Docker is running: docker ps".to_string())
            }
            Error::Config(_) | Error::Strict(_) => {
                Some("Validate your config with: bay graph".to_string())
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
