//! Build, volume and boot passes over a resolved formation.

mod boot;
mod build;
mod containers;
mod context;
mod schedule;
mod volumes;

pub use boot::{
    config_digest, BootAction, BootOptions, BootOrchestrator, BootReport, BootState, BootTask,
};
pub use build::{
    BuildOptions, BuildOrchestrator, BuildPlan, BuildReport, BuildTask, Fingerprint,
};
pub use containers::{copy, parse_copy_target, tail, DEFAULT_TAIL_LINES};
pub use context::{Context, HostState, STOP_GRACE};
pub use schedule::{Event, NodeOutcome, Progress, Schedule, Scheduler};
pub use volumes::{MountRow, VolumeManager, VolumeRow, EXTRACT_PATH};

/// Label on every image, container and volume bay creates.
pub const PREFIX_LABEL: &str = "bay.prefix";
/// Logical container name on images and containers.
pub const CONTAINER_LABEL: &str = "bay.container";
/// Digest of the resolved run configuration, on containers.
pub const CONFIG_DIGEST_LABEL: &str = "bay.config-digest";
/// Id of the image a provided volume was extracted from.
pub const BUILD_ID_LABEL: &str = "build_id";
