//! # Bay
//!
//! Builds and boots multi-container development formations.
//!
//! A formation is described in `bay.yaml`: containers, the volumes they
//! mount, the links between them, and profiles that choose which containers
//! a developer works with. Bay resolves the active profile into a
//! [`profile::FormationSpec`], turns it into a [`dependency::DependencyGraph`],
//! and then runs build and boot passes over it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bay::{Parser, ProfileResolver};
//! use bay::dependency::GraphBuilder;
//! use bay::docker::DockerClient;
//! use bay::orchestrator::{BootOptions, BootOrchestrator, Context};
//! use std::sync::Arc;
//!
//! # async fn example() -> bay::Result<()> {
//! let parser = Parser::new();
//! let config = Arc::new(parser.load_config("bay.yaml")?);
//! let spec = ProfileResolver::resolve(config.clone(), Some("backend"))?.value;
//! let graph = GraphBuilder::new(&spec).build()?.value;
//!
//! let docker = Arc::new(DockerClient::new());
//! let ctx = Context::new(docker.clone(), docker, config.settings.bay.clone())?;
//! BootOrchestrator::new(&ctx, &spec, &graph)
//!     .up(&BootOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Each invocation runs one pass. Independent branches of the graph run
//! concurrently up to `settings.bay.parallelism`; a failure skips only the
//! failed node's dependents and every failure is reported together.

pub mod build;
pub mod config;
pub mod dependency;
pub mod diagnostics;
pub mod docker;
pub mod error;
pub mod healthcheck;
pub mod orchestrator;
pub mod profile;
pub mod runtime;

pub use config::{Config, Parser};
pub use diagnostics::{Checked, Warning, WarningKind};
pub use error::{Error, Result};
pub use profile::{FormationSpec, ProfileResolver};
