mod build;
mod copy;
mod graph;
mod lifecycle;
mod profile;
mod push;
mod tail;
mod volume;

pub use build::run_build;
pub use copy::run_copy;
pub use graph::run_graph;
pub use lifecycle::{run_start, run_stop, run_up};
pub use profile::{run_profile, run_profiles};
pub use push::run_push;
pub use tail::run_tail;
pub use volume::{run_mounts, run_volume_destroy, run_volume_list};

use crate::output::UserOutput;
use bay::dependency::{DependencyGraph, GraphBuilder};
use bay::docker::DockerClient;
use bay::orchestrator::Context;
use bay::profile::active_profile_name;
use bay::{Config, FormationSpec, Parser, ProfileResolver, Warning};
use std::path::PathBuf;
use std::sync::Arc;

/// Locate and parse the config file.
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let parser = Parser::new();
    let path = match path {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    Ok(parser.load_config(&path)?)
}

/// Everything a command needs: the resolved formation, its graph, and a
/// runtime context.
pub struct Formation {
    pub config: Arc<Config>,
    pub spec: FormationSpec,
    pub graph: DependencyGraph,
    pub ctx: Context,
}

impl Formation {
    /// Validate, resolve the active profile and build the graph.
    ///
    /// Warnings are printed; with `strict` the first escalating one aborts.
    pub fn load(
        config: Config,
        profile: Option<&str>,
        out: &dyn UserOutput,
    ) -> anyhow::Result<Self> {
        let strict = config.settings.bay.strict;
        let mut warnings: Vec<Warning> = Vec::new();

        config.validate()?.into_strict(strict)?.drain_into(&mut warnings);
        for corrupted in &config.corrupted_profiles {
            warnings.push(Warning::validation(format!(
                "Profile file '{}' could not be parsed and was skipped",
                corrupted
            )));
        }

        let active = active_profile_name(&config, profile)?;
        let config = Arc::new(config);
        let spec = ProfileResolver::resolve(config.clone(), active.as_deref())?
            .into_strict(strict)?
            .drain_into(&mut warnings);
        let graph = GraphBuilder::new(&spec)
            .build()?
            .into_strict(strict)?
            .drain_into(&mut warnings);

        for warning in &warnings {
            out.warning(&warning.message);
        }

        let docker = Arc::new(DockerClient::with_timeout(
            config.settings.bay.runtime_timeout()?,
        ));
        let ctx = Context::new(docker.clone(), docker, config.settings.bay.clone())?;

        Ok(Self {
            config,
            spec,
            graph,
            ctx,
        })
    }

    /// Cancel in-flight work on Ctrl+C.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.ctx.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }
}
