//! Container runtime and registry interfaces.
//!
//! The orchestrator never shells out itself; it talks to a
//! [`ContainerRuntime`] and a [`Registry`]. [`crate::docker::DockerClient`]
//! implements both over the Docker CLI, and tests substitute in-memory fakes.

mod retry;

pub use retry::{call_runtime, RetryPolicy};

use crate::config::MountModes;
use crate::docker::DockerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw build output, in whatever chunk sizes the runtime delivers.
///
/// The stream ends after the last chunk on success. A build that fails
/// yields an `Err` item as its final element.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, RuntimeError>>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("connection reset by the runtime: {0}")]
    ConnectionReset(String),

    #[error("'{operation}' timed out after {}s", timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("{0}")]
    Other(String),
}

const TRANSIENT_MARKERS: [&str; 6] = [
    "connection reset",
    "broken pipe",
    "unexpected eof",
    "i/o timeout",
    "cannot connect to the docker daemon",
    "tls handshake timeout",
];

impl RuntimeError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RuntimeError::ConnectionReset(_) | RuntimeError::Timeout { .. } => true,
            RuntimeError::Docker(DockerError::Timeout { .. })
            | RuntimeError::Docker(DockerError::DaemonUnavailable) => true,
            RuntimeError::Docker(DockerError::CommandFailed { stderr, .. }) => {
                let stderr = stderr.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            RuntimeError::Docker(_) | RuntimeError::Other(_) => false,
        }
    }
}

/// Everything needed to build one image.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub container: String,
    pub image: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub no_cache: bool,
}

/// A volume mounted into a container being started.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MountSpec {
    pub volume: String,
    pub path: String,
    pub modes: MountModes,
}

/// A link as the runtime sees it: the linked container's runtime name and
/// the hostname it is reachable under.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LinkSpec {
    pub container: String,
    pub alias: String,
}

/// Fully resolved parameters of `docker run`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub environment: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub links: Vec<LinkSpec>,
    pub mem_limit: Option<u64>,
    pub ports: Vec<String>,
    pub command: Option<Vec<String>>,
    #[serde(skip)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub id: String,
    pub image_id: String,
    pub running: bool,
    pub labels: BTreeMap<String, String>,
    /// Names of the volumes mounted into this container.
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails when the runtime cannot be reached at all.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn build(&self, request: &BuildRequest) -> Result<ChunkStream, RuntimeError>;

    /// Start a detached container. Returns its id.
    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError>;

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageInfo>, RuntimeError>;

    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeInfo>, RuntimeError>;

    /// All containers, running or not, carrying `label` (`key=value`) when given.
    async fn list_containers(&self, label: Option<&str>)
        -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn list_images(&self, reference: Option<&str>) -> Result<Vec<ImageInfo>, RuntimeError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError>;

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Remove a container. Missing containers are not an error.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    async fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    /// Remove a volume. Missing volumes are not an error.
    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Last `tail` lines of the container's output.
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;

    async fn copy_into(&self, container: &str, source: &Path, dest: &str)
        -> Result<(), RuntimeError>;

    /// Block until the container exits; returns its exit code.
    async fn wait(&self, name: &str) -> Result<i64, RuntimeError>;

    /// Run `sh -c command` inside a running container; returns the exit code.
    async fn exec(&self, name: &str, command: &str) -> Result<i32, RuntimeError>;
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn login(&self, registry: &str) -> Result<(), RuntimeError>;

    async fn push(&self, image: &str) -> Result<(), RuntimeError>;

    /// Pull `image`. `Ok(false)` means the registry does not have it.
    async fn pull(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;
}
