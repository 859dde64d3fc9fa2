//! Boot pass: start containers in dependency order, wait for readiness, and
//! restart what changed.

use super::build::{BuildOptions, BuildOrchestrator};
use super::schedule::{Event, NodeOutcome, Progress, Schedule, Scheduler};
use super::volumes::VolumeManager;
use super::{Context, CONFIG_DIGEST_LABEL, CONTAINER_LABEL, PREFIX_LABEL};
use crate::config::container_memory_bytes;
use crate::dependency::{boot_expands, boot_orders, DependencyGraph, Node};
use crate::diagnostics::Warning;
use crate::error::{Error, Result};
use crate::healthcheck::{checker_for, wait_until_ready};
use crate::profile::FormationSpec;
use crate::runtime::{call_runtime, ContainerInfo, LinkSpec, RunSpec};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::Instrument;

/// Lifecycle of one container within a boot pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootState {
    Stopped,
    Starting,
    WaitingReady,
    Ready,
    Failed,
    /// Not attempted because a dependency did not become ready.
    Skipped,
}

impl BootState {
    pub fn can_transition(self, to: BootState) -> bool {
        use BootState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Stopped, Skipped)
                | (Starting, WaitingReady)
                | (Starting, Failed)
                | (WaitingReady, Ready)
                | (WaitingReady, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BootState::Ready | BootState::Failed | BootState::Skipped)
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BootState::Stopped => "stopped",
            BootState::Starting => "starting",
            BootState::WaitingReady => "waiting for readiness",
            BootState::Ready => "ready",
            BootState::Failed => "failed",
            BootState::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

/// Per-container scheduling record of a boot pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootTask {
    pub container: String,
    pub state: BootState,
}

impl BootTask {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            state: BootState::Stopped,
        }
    }

    pub fn advance(&mut self, to: BootState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::Config(format!(
                "'{}' cannot go from {} to {}",
                self.container, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// What a boot task did to its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    Started,
    Restarted,
    AlreadyRunning,
}

#[derive(Debug, Clone, Default)]
pub struct BootOptions {
    /// Let bulk selection include system containers.
    pub include_system: bool,
    /// Containers to restart even when unchanged.
    pub restart: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BootReport {
    pub tasks: BTreeMap<String, BootTask>,
    /// Every state change in the order the scheduler observed it.
    pub history: Vec<(String, BootState)>,
    pub actions: BTreeMap<String, BootAction>,
    pub warnings: Vec<Warning>,
    /// Containers stopped because they fell outside the boot set.
    pub pruned: Vec<String>,
}

impl BootReport {
    pub fn state(&self, container: &str) -> Option<BootState> {
        self.tasks.get(container).map(|t| t.state)
    }

    fn observe(&mut self, container: &str, to: BootState) {
        let task = self
            .tasks
            .entry(container.to_string())
            .or_insert_with(|| BootTask::new(container));
        if let Err(e) = task.advance(to) {
            tracing::error!("{}", e);
            return;
        }
        self.history.push((container.to_string(), to));
    }
}

/// Outcome of one scheduled node. Volume nodes carry no action.
struct NodeDone {
    action: Option<BootAction>,
    warnings: Vec<Warning>,
}

pub struct BootOrchestrator<'a> {
    ctx: &'a Context,
    spec: &'a FormationSpec,
    graph: &'a DependencyGraph,
}

impl<'a> BootOrchestrator<'a> {
    pub fn new(ctx: &'a Context, spec: &'a FormationSpec, graph: &'a DependencyGraph) -> Self {
        Self { ctx, spec, graph }
    }

    /// The profile's default-boot set, minus system containers unless asked.
    pub fn bulk_selection(&self, include_system: bool) -> Vec<String> {
        let config = self.spec.config();
        self.spec
            .default_boot_set()
            .into_iter()
            .filter(|name| include_system || !self.spec.is_system(name))
            .filter(|name| !config.is_provider(name))
            .collect()
    }

    /// Targets plus whatever they need at runtime, in boot order.
    ///
    /// System containers pulled in as dependencies are part of the result.
    pub fn boot_order(&self, targets: &[String]) -> Result<Vec<Node>> {
        let config = self.spec.config();
        for target in targets {
            if !self.spec.contains(target) {
                return Err(Error::ContainerNotFound(target.clone()));
            }
            if let Some(volume) = config.provided_volume(target) {
                return Err(Error::Config(format!(
                    "'{}' provides volume '{}' and cannot be booted",
                    target, volume
                )));
            }
        }
        let nodes: Vec<Node> = targets.iter().map(Node::container).collect();
        let members = self.graph.closure(&nodes, boot_expands);
        self.graph.topological_sort(&members, boot_orders)
    }

    /// Boot the default set and stop formation containers outside it.
    pub async fn up(&self, options: &BootOptions) -> Result<BootReport> {
        let targets = self.bulk_selection(options.include_system);
        let order = self.boot_order(&targets)?;
        let keep: BTreeSet<String> = order
            .iter()
            .filter_map(|n| n.as_container().map(str::to_string))
            .collect();

        let pruned = self.prune(&keep).await?;
        let mut report = self.run(&order, options).await?;
        report.pruned = pruned;
        Ok(report)
    }

    /// Boot exactly `targets` and their dependencies.
    pub async fn start(&self, targets: &[String], options: &BootOptions) -> Result<BootReport> {
        let order = self.boot_order(targets)?;
        self.run(&order, options).await
    }

    async fn run(&self, order: &[Node], options: &BootOptions) -> Result<BootReport> {
        self.ctx.ensure_runtime().await?;
        self.build_missing_images(order).await?;

        let members: BTreeSet<Node> = order.iter().cloned().collect();
        let mut report = BootReport::default();
        for node in order {
            if let Some(name) = node.as_container() {
                report.tasks.insert(name.to_string(), BootTask::new(name));
            }
        }

        let builder = BuildOrchestrator::new(self.ctx, self.spec, self.graph);
        let volumes = VolumeManager::new(self.ctx, self.spec, self.graph);
        let scheduler = Scheduler::new(self.ctx.settings.parallelism, self.ctx.cancel.clone());

        let schedule = scheduler
            .run(
                order,
                |node| self.graph.dependencies(node, boot_orders),
                |node, progress: Progress<BootState>| {
                    let builder = &builder;
                    let volumes = &volumes;
                    let members = &members;
                    async move {
                        match &node {
                            Node::Volume(volume) => {
                                volumes.ensure(volume, builder).await?;
                                Ok(NodeDone {
                                    action: None,
                                    warnings: Vec::new(),
                                })
                            }
                            Node::Container(name) => {
                                self.boot_one(name, members, options, &progress)
                                    .instrument(tracing::info_span!("boot", container = %name))
                                    .await
                            }
                        }
                    }
                },
                |node, event| {
                    let Some(name) = node.as_container() else {
                        return;
                    };
                    match event {
                        Event::Launched => report.observe(name, BootState::Starting),
                        Event::Progress(state) => report.observe(name, state),
                        Event::Succeeded => {
                            report.observe(name, BootState::Ready);
                            tracing::info!("{} is ready", name);
                        }
                        Event::Failed(_) => report.observe(name, BootState::Failed),
                        Event::Skipped(_) => report.observe(name, BootState::Skipped),
                    }
                },
            )
            .await;

        let Schedule {
            outcomes, errors, ..
        } = schedule;
        for (node, outcome) in outcomes {
            let NodeOutcome::Done(value) = outcome else {
                continue;
            };
            if let (Some(name), Some(action)) = (node.as_container(), value.action) {
                report.actions.insert(name.to_string(), action);
            }
            report.warnings.extend(value.warnings);
        }
        for warning in &report.warnings {
            tracing::warn!("{}", warning.message);
        }

        Error::aggregate(errors)?;
        Ok(report)
    }

    /// Build what the pass needs before anything starts.
    ///
    /// System containers are rebuilt when their context changed, so the config
    /// digest picks up the new image and restarts them. Everything else is
    /// only built when missing.
    async fn build_missing_images(&self, order: &[Node]) -> Result<()> {
        let (system, others): (Vec<String>, Vec<String>) = order
            .iter()
            .filter_map(|n| n.as_container().map(str::to_string))
            .partition(|name| self.spec.is_system(name));
        let builder = BuildOrchestrator::new(self.ctx, self.spec, self.graph);
        if !system.is_empty() {
            builder.build(&system, BuildOptions::default()).await?;
        }
        if !others.is_empty() {
            builder.build_missing(&others).await?;
        }
        Ok(())
    }

    /// Resolved runtime parameters for `container`.
    pub async fn run_spec(&self, container: &str, pass: &BTreeSet<Node>) -> Result<RunSpec> {
        let config = self.spec.config();
        let def = config.container(container)?;
        let image = config.image_name(container)?;
        let image_id = call_runtime(&self.ctx.retry, "inspect image", || {
            self.ctx.runtime.inspect_image(&image)
        })
        .await?
        .map(|i| i.id)
        .ok_or_else(|| {
            Error::Config(format!(
                "Image '{}' for '{}' is missing; run `bay build {}`",
                image, container, container
            ))
        })?;

        // Optional links to containers running outside the pass are wired but
        // kept out of the digest, so they never trigger a restart.
        let mut links = Vec::new();
        let mut digested_links = Vec::new();
        for (link, required) in def.link_targets() {
            if !self.spec.contains(&link.target) {
                continue;
            }
            let target_runtime = config.runtime_name(&link.target);
            let in_pass = required || pass.contains(&Node::container(&link.target));
            if !in_pass && !self.is_running(&target_runtime).await? {
                continue;
            }
            let link = LinkSpec {
                container: target_runtime,
                alias: link.hostname().to_string(),
            };
            if in_pass {
                digested_links.push(link.clone());
            }
            links.push(link);
        }

        let environment = self
            .spec
            .options(container)
            .map(|o| o.environment.clone())
            .unwrap_or_else(|| def.environment.clone());

        let mut spec = RunSpec {
            name: config.runtime_name(container),
            image,
            image_id,
            environment,
            mounts: VolumeManager::new(self.ctx, self.spec, self.graph).mount_specs(container)?,
            links,
            mem_limit: container_memory_bytes(container, def.mem_limit.as_deref())?,
            ports: def.ports.clone(),
            command: def.command.clone(),
            labels: BTreeMap::new(),
        };
        let digest = config_digest(&RunSpec {
            links: digested_links,
            ..spec.clone()
        })?;
        spec.labels = BTreeMap::from([
            (PREFIX_LABEL.to_string(), config.prefix().to_string()),
            (CONTAINER_LABEL.to_string(), container.to_string()),
            (CONFIG_DIGEST_LABEL.to_string(), digest),
        ]);
        Ok(spec)
    }

    async fn is_running(&self, runtime_name: &str) -> Result<bool> {
        Ok(self.inspect(runtime_name).await?.is_some_and(|c| c.running))
    }

    async fn inspect(&self, runtime_name: &str) -> Result<Option<ContainerInfo>> {
        call_runtime(&self.ctx.retry, "inspect container", || {
            self.ctx.runtime.inspect_container(runtime_name)
        })
        .await
    }

    async fn boot_one(
        &self,
        container: &str,
        pass: &BTreeSet<Node>,
        options: &BootOptions,
        progress: &Progress<BootState>,
    ) -> Result<NodeDone> {
        let spec = self.run_spec(container, pass).await?;
        let existing = self.inspect(&spec.name).await?;
        let mut warnings = Vec::new();

        let action = match existing {
            Some(info) if info.running => {
                if self.needs_restart(container, &spec, &info, options, &mut warnings) {
                    tracing::info!("Restarting {}", container);
                    self.ctx.stop_container(&spec.name).await?;
                    self.ctx.remove_container(&spec.name).await?;
                    self.launch(&spec).await?;
                    BootAction::Restarted
                } else {
                    tracing::debug!("{} is already running", container);
                    BootAction::AlreadyRunning
                }
            }
            Some(_) => {
                self.ctx.remove_container(&spec.name).await?;
                self.launch(&spec).await?;
                BootAction::Started
            }
            None => {
                self.launch(&spec).await?;
                BootAction::Started
            }
        };

        progress.report(BootState::WaitingReady);
        if let Some(probe) = &self.spec.definition(container)?.readiness {
            let checker = checker_for(probe, self.ctx.runtime.clone(), &spec.name)?;
            wait_until_ready(container, checker.as_ref(), &self.ctx.readiness, &self.ctx.cancel)
                .await?;
        }

        Ok(NodeDone {
            action: Some(action),
            warnings,
        })
    }

    fn needs_restart(
        &self,
        container: &str,
        spec: &RunSpec,
        running: &ContainerInfo,
        options: &BootOptions,
        warnings: &mut Vec<Warning>,
    ) -> bool {
        if options.restart.contains(container) {
            return true;
        }
        let Some(current) = running.labels.get(CONFIG_DIGEST_LABEL) else {
            warnings.push(Warning::runtime_state(format!(
                "'{}' is running without a {} label; leaving it as is",
                container, CONFIG_DIGEST_LABEL
            )));
            return false;
        };
        if self.spec.is_system(container) {
            spec.labels.get(CONFIG_DIGEST_LABEL) != Some(current)
        } else {
            running.image_id != spec.image_id
        }
    }

    async fn launch(&self, spec: &RunSpec) -> Result<()> {
        tracing::info!("Starting {}", spec.name);
        call_runtime(&self.ctx.retry, "run", || self.ctx.runtime.run(spec)).await?;
        Ok(())
    }

    /// Stop running non-system formation containers outside `keep`.
    async fn prune(&self, keep: &BTreeSet<String>) -> Result<Vec<String>> {
        let config = self.spec.config();
        let running = self.running_formation_containers().await?;
        let outside: Vec<String> = running
            .into_iter()
            .filter(|name| !keep.contains(name) && !self.spec.is_system(name))
            .collect();
        if outside.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Stopping containers outside the profile: {}", outside.join(", "));
        self.stop_in_order(&outside).await?;
        Ok(outside
            .iter()
            .map(|name| config.runtime_name(name))
            .collect())
    }

    /// Formation containers the runtime reports as running, by logical name.
    async fn running_formation_containers(&self) -> Result<Vec<String>> {
        let config = self.spec.config();
        let label = format!("{}={}", PREFIX_LABEL, config.prefix());
        let listed = call_runtime(&self.ctx.retry, "list containers", || {
            self.ctx.runtime.list_containers(Some(&label))
        })
        .await?;
        Ok(listed
            .into_iter()
            .filter(|c| c.running)
            .filter_map(|c| c.labels.get(CONTAINER_LABEL).cloned())
            .filter(|name| self.spec.contains(name))
            .collect())
    }

    /// Stop `targets` (all running non-system containers when empty) and
    /// everything running that depends on them, dependents first.
    pub async fn stop(&self, targets: &[String], include_system: bool) -> Result<Vec<String>> {
        self.ctx.ensure_runtime().await?;
        let running: BTreeSet<String> = self
            .running_formation_containers()
            .await?
            .into_iter()
            .collect();

        let selected: BTreeSet<String> = if targets.is_empty() {
            running
                .iter()
                .filter(|name| include_system || !self.spec.is_system(name))
                .cloned()
                .collect()
        } else {
            let mut selected = BTreeSet::new();
            for target in targets {
                if !self.spec.contains(target) {
                    return Err(Error::ContainerNotFound(target.clone()));
                }
                selected.insert(target.clone());
                for ancestor in self.graph.ancestors(&Node::container(target), boot_expands) {
                    if let Some(name) = ancestor.as_container() {
                        selected.insert(name.to_string());
                    }
                }
            }
            selected.retain(|name| running.contains(name));
            selected
        };

        let names: Vec<String> = selected.into_iter().collect();
        self.stop_in_order(&names).await?;
        Ok(names)
    }

    async fn stop_in_order(&self, containers: &[String]) -> Result<()> {
        let config = self.spec.config();
        let members: BTreeSet<Node> = containers.iter().map(Node::container).collect();
        let mut order = self.graph.topological_sort(&members, boot_orders)?;
        order.reverse();

        // Reversed edges: a container waits for everything depending on it.
        let dependents = |node: &Node| -> Vec<Node> {
            self.graph
                .ancestors(node, boot_orders)
                .into_iter()
                .filter(|n| members.contains(n))
                .collect()
        };
        // Stopping continues even after cancellation; a half-stopped formation is worse.
        let scheduler = Scheduler::new(self.ctx.settings.parallelism, Default::default());
        let schedule = scheduler
            .run(
                &order,
                dependents,
                |node, _progress: Progress<()>| {
                    let runtime_name = config.runtime_name(node.name());
                    async move { self.ctx.stop_container(&runtime_name).await }
                },
                |node, event| {
                    if let Event::Succeeded = event {
                        tracing::info!("Stopped {}", node.name());
                    }
                },
            )
            .await;
        schedule.into_result()
    }
}

/// SHA-256 of everything that shapes a running container.
pub fn config_digest(spec: &RunSpec) -> Result<String> {
    let json = serde_json::to_vec(spec)?;
    Ok(hex::encode(Sha256::digest(&json)))
}
