//! Build pass: decide which images need building, then build them in
//! dependency order with bounded concurrency.

use super::schedule::{Event, Progress, Scheduler};
use super::volumes::VolumeManager;
use super::{Context, CONTAINER_LABEL, PREFIX_LABEL};
use crate::build::{
    applicable_build_args, context_digest, dependency_digest, BuildReason, LogDecoder,
    LogSegment, LogTail, CONTEXT_DIGEST_LABEL, DEPENDENCY_DIGEST_LABEL,
};
use crate::dependency::{build_edges, DependencyGraph, Node};
use crate::error::{Error, Result};
use crate::profile::FormationSpec;
use crate::runtime::{call_runtime, BuildRequest, RuntimeError};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Rebuild the requested containers regardless of their state.
    pub force: bool,
    /// Include build dependencies of the requested containers.
    pub recursive: bool,
    pub no_cache: bool,
    /// Rebuild images whose context changed. When off, only missing images
    /// are produced.
    pub rebuild_changed: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            force: false,
            recursive: true,
            no_cache: false,
            rebuild_changed: true,
        }
    }
}

impl BuildOptions {
    pub fn missing_only() -> Self {
        Self {
            rebuild_changed: false,
            ..Self::default()
        }
    }
}

/// Per-container record of one build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTask {
    pub container: String,
    pub image: String,
    /// `None` when the existing image is kept.
    pub reason: Option<BuildReason>,
    /// Digests the image gets labelled with; only for buildable containers.
    pub fingerprint: Option<Fingerprint>,
    /// Satisfied by a registry pull instead of a build.
    pub pulled: bool,
}

/// What an image was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// The container's own build context.
    pub context: String,
    /// Contexts of every buildable container it is built against.
    pub dependencies: Option<String>,
}

impl Fingerprint {
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels =
            BTreeMap::from([(CONTEXT_DIGEST_LABEL.to_string(), self.context.clone())]);
        if let Some(dependencies) = &self.dependencies {
            labels.insert(DEPENDENCY_DIGEST_LABEL.to_string(), dependencies.clone());
        }
        labels
    }

    /// Compare against the labels of an existing image.
    fn staleness(&self, labels: &BTreeMap<String, String>) -> Option<BuildReason> {
        if labels.get(CONTEXT_DIGEST_LABEL) != Some(&self.context) {
            Some(BuildReason::Changed)
        } else if labels.get(DEPENDENCY_DIGEST_LABEL) != self.dependencies.as_ref() {
            Some(BuildReason::AncestorOfChanged)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    /// Every container considered, in build order.
    pub order: Vec<String>,
    pub tasks: BTreeMap<String, BuildTask>,
}

impl BuildPlan {
    /// Containers that will be built, in build order.
    pub fn to_build(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|c| self.tasks.get(*c).is_some_and(|t| t.reason.is_some()))
            .cloned()
            .collect()
    }

    pub fn reason(&self, container: &str) -> Option<BuildReason> {
        self.tasks.get(container).and_then(|t| t.reason)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Built containers in completion order.
    pub built: Vec<(String, BuildReason)>,
    pub pulled: Vec<String>,
    pub up_to_date: Vec<String>,
    pub elapsed: Duration,
}

pub struct BuildOrchestrator<'a> {
    ctx: &'a Context,
    spec: &'a FormationSpec,
    graph: &'a DependencyGraph,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(ctx: &'a Context, spec: &'a FormationSpec, graph: &'a DependencyGraph) -> Self {
        Self { ctx, spec, graph }
    }

    /// Decide per container whether it builds and why.
    ///
    /// Missing images are pulled from the registry here when possible, since
    /// a pull changes what counts as missing.
    pub async fn plan(&self, targets: &[String], options: BuildOptions) -> Result<BuildPlan> {
        let config = self.spec.config();
        for target in targets {
            if !self.spec.contains(target) {
                return Err(Error::ContainerNotFound(target.clone()));
            }
        }

        let target_nodes: Vec<Node> = targets.iter().map(Node::container).collect();
        let members: BTreeSet<Node> = if options.recursive {
            self.graph.closure(&target_nodes, build_edges)
        } else {
            target_nodes.iter().cloned().collect()
        };
        let order: Vec<String> = self
            .graph
            .topological_sort(&members, build_edges)?
            .into_iter()
            .filter_map(|n| n.as_container().map(str::to_string))
            .collect();

        let mut plan = BuildPlan {
            order: order.clone(),
            tasks: BTreeMap::new(),
        };
        let mut digests = BTreeMap::new();

        for container in &order {
            let def = config.container(container)?;
            let image = config.image_name(container)?;
            let mut task = BuildTask {
                container: container.clone(),
                image: image.clone(),
                reason: None,
                fingerprint: None,
                pulled: false,
            };

            if def.is_buildable() {
                task.fingerprint = Some(self.fingerprint_with(container, &mut digests)?);
            }

            let local = call_runtime(&self.ctx.retry, "inspect image", || {
                self.ctx.runtime.inspect_image(&image)
            })
            .await?;

            let forced = options.force && targets.contains(container);
            task.reason = match &local {
                _ if forced && def.is_buildable() => Some(BuildReason::Forced),
                None => {
                    if self.try_pull(container, &image).await? {
                        task.pulled = true;
                        None
                    } else if def.is_buildable() {
                        Some(BuildReason::Missing)
                    } else {
                        return Err(Error::Build {
                            container: container.clone(),
                            reason: format!(
                                "image '{}' is not available and the container has no build context",
                                image
                            ),
                            log_tail: Vec::new(),
                        });
                    }
                }
                Some(info) if options.rebuild_changed => task
                    .fingerprint
                    .as_ref()
                    .and_then(|fingerprint| fingerprint.staleness(&info.labels)),
                Some(_) => None,
            };
            plan.tasks.insert(container.clone(), task);
        }

        // Anything depending on a rebuilt image is rebuilt as well.
        let rebuilding: Vec<String> = plan.to_build();
        for container in rebuilding {
            for ancestor in self.graph.ancestors(&Node::container(&container), build_edges) {
                let Some(name) = ancestor.as_container() else {
                    continue;
                };
                if let Some(task) = plan.tasks.get_mut(name) {
                    let buildable = config.container(name)?.is_buildable();
                    if task.reason.is_none() && buildable {
                        task.reason = Some(BuildReason::AncestorOfChanged);
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Build everything `plan` marks for building.
    pub async fn execute(&self, plan: &BuildPlan, options: BuildOptions) -> Result<BuildReport> {
        let started = Instant::now();
        let to_build = plan.to_build();
        let build_set: BTreeSet<Node> = to_build.iter().map(Node::container).collect();
        let order: Vec<Node> = to_build.iter().map(Node::container).collect();

        if !order.is_empty() {
            self.ctx.ensure_runtime().await?;
        }

        // Dependencies can be indirect (through a mounted volume and its provider).
        let dependencies = |node: &Node| -> Vec<Node> {
            self.graph
                .closure(std::iter::once(node), build_edges)
                .into_iter()
                .filter(|n| n != node && build_set.contains(n))
                .collect()
        };

        let scheduler = Scheduler::new(self.ctx.settings.parallelism, self.ctx.cancel.clone());
        let schedule = scheduler
            .run(
                &order,
                dependencies,
                |node, _progress: Progress<()>| {
                    let container = node.name().to_string();
                    let task = plan.tasks.get(&container).cloned();
                    async move {
                        let task = task.ok_or_else(|| Error::ContainerNotFound(container.clone()))?;
                        self.build_one(&task, options)
                            .instrument(tracing::info_span!("build", container = %container))
                            .await
                    }
                },
                |node, event| match event {
                    Event::Launched => {
                        let reason = plan
                            .reason(node.name())
                            .map(|r| r.to_string())
                            .unwrap_or_default();
                        tracing::info!("Building {} ({})", node.name(), reason);
                    }
                    Event::Failed(message) => {
                        tracing::error!("Build of {} failed: {}", node.name(), message)
                    }
                    _ => {}
                },
            )
            .await;

        let mut report = BuildReport {
            pulled: plan
                .order
                .iter()
                .filter(|c| plan.tasks.get(*c).is_some_and(|t| t.pulled))
                .cloned()
                .collect(),
            up_to_date: plan
                .order
                .iter()
                .filter(|c| {
                    plan.tasks
                        .get(*c)
                        .is_some_and(|t| t.reason.is_none() && !t.pulled)
                })
                .cloned()
                .collect(),
            ..BuildReport::default()
        };
        for node in &schedule.completed {
            if let Some(reason) = plan.reason(node.name()) {
                report.built.push((node.name().to_string(), reason));
            }
        }
        report.elapsed = started.elapsed();
        tracing::info!(
            "Build pass finished in {:.1}s ({} built)",
            report.elapsed.as_secs_f64(),
            report.built.len()
        );

        schedule.into_result()?;
        Ok(report)
    }

    /// Plan and execute in one go.
    pub async fn build(&self, targets: &[String], options: BuildOptions) -> Result<BuildReport> {
        let plan = self.plan(targets, options).await?;
        self.execute(&plan, options).await
    }

    /// Produce images only where they are missing.
    pub async fn build_missing(&self, targets: &[String]) -> Result<BuildReport> {
        self.build(targets, BuildOptions::missing_only()).await
    }

    /// Tag each image for the registry and push it.
    pub async fn push(&self, containers: &[String]) -> Result<Vec<String>> {
        let registry = self.ctx.settings.registry.clone().ok_or_else(|| {
            Error::Registry("no registry configured (settings.bay.registry)".to_string())
        })?;
        self.ctx.ensure_runtime().await?;
        self.ctx
            .registry
            .login(&registry)
            .await
            .map_err(|e| Error::Registry(format!("login to {} failed: {}", registry, e)))?;

        let mut pushed = Vec::new();
        for container in containers {
            if !self.spec.contains(container) {
                return Err(Error::ContainerNotFound(container.clone()));
            }
            let image = self.spec.config().image_name(container)?;
            let remote = format!("{}/{}", registry, image);
            call_runtime(&self.ctx.retry, "tag", || {
                self.ctx.runtime.tag_image(&image, &remote)
            })
            .await?;
            self.ctx
                .registry
                .push(&remote)
                .await
                .map_err(|e| Error::Registry(format!("push of {} failed: {}", remote, e)))?;
            tracing::info!("Pushed {}", remote);
            pushed.push(remote);
        }
        Ok(pushed)
    }

    /// Digests `container`'s image would be labelled with if built now.
    pub fn fingerprint(&self, container: &str) -> Result<Fingerprint> {
        self.fingerprint_with(container, &mut BTreeMap::new())
    }

    /// `digests` caches context digests across containers of one pass.
    fn fingerprint_with(
        &self,
        container: &str,
        digests: &mut BTreeMap<String, String>,
    ) -> Result<Fingerprint> {
        let config = self.spec.config();
        let node = Node::container(container);
        let mut dependencies = Vec::new();
        for dependency in self.graph.closure(std::iter::once(&node), build_edges) {
            let Some(name) = dependency.as_container() else {
                continue;
            };
            if name != container && config.container(name)?.is_buildable() {
                let digest = self.context_digest_cached(name, digests)?;
                dependencies.push((name.to_string(), digest));
            }
        }
        Ok(Fingerprint {
            context: self.context_digest_cached(container, digests)?,
            dependencies: dependency_digest(
                dependencies.iter().map(|(n, d)| (n.as_str(), d.as_str())),
            ),
        })
    }

    fn context_digest_cached(
        &self,
        container: &str,
        digests: &mut BTreeMap<String, String>,
    ) -> Result<String> {
        if let Some(digest) = digests.get(container) {
            return Ok(digest.clone());
        }
        let def = self.spec.config().container(container)?;
        let (context, dockerfile) = self.build_paths(container)?;
        let args = applicable_build_args(&def.build_args, &dockerfile)?;
        let digest = context_digest(&context, &dockerfile, &args)?;
        digests.insert(container.to_string(), digest.clone());
        Ok(digest)
    }

    fn build_paths(&self, container: &str) -> Result<(PathBuf, PathBuf)> {
        let config = self.spec.config();
        let def = config.container(container)?;
        let context = def.build_context(&config.root).ok_or_else(|| {
            Error::Config(format!("Container '{}' has no build context", container))
        })?;
        let dockerfile = def
            .dockerfile_path(&config.root)
            .unwrap_or_else(|| context.join("Dockerfile"));
        Ok((context, dockerfile))
    }

    /// Pull a missing image; `Ok(false)` when it is not available.
    async fn try_pull(&self, container: &str, image: &str) -> Result<bool> {
        let def = self.spec.config().container(container)?;
        let remote = match (&self.ctx.settings.registry, def.is_buildable()) {
            (Some(registry), true) => format!("{}/{}", registry, image),
            (None, true) => return Ok(false),
            // Image-only containers are pulled under their own name.
            (_, false) => image.to_string(),
        };

        match self.ctx.registry.pull(&remote).await {
            Ok(true) => {
                if remote != image {
                    call_runtime(&self.ctx.retry, "tag", || {
                        self.ctx.runtime.tag_image(&remote, image)
                    })
                    .await?;
                }
                tracing::info!("Pulled {} for '{}'", remote, container);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                tracing::warn!("Pull of {} failed: {}", remote, e);
                Ok(false)
            }
        }
    }

    async fn build_one(&self, task: &BuildTask, options: BuildOptions) -> Result<()> {
        let config = self.spec.config();
        let def = config.container(&task.container)?;
        let (context, dockerfile) = self.build_paths(&task.container)?;
        let build_args = applicable_build_args(&def.build_args, &dockerfile)?;

        let mut labels = BTreeMap::from([
            (PREFIX_LABEL.to_string(), config.prefix().to_string()),
            (CONTAINER_LABEL.to_string(), task.container.clone()),
        ]);
        if let Some(fingerprint) = &task.fingerprint {
            labels.extend(fingerprint.labels());
        }

        let request = BuildRequest {
            container: task.container.clone(),
            image: task.image.clone(),
            context,
            dockerfile,
            build_args,
            labels,
            no_cache: options.no_cache,
        };

        let log_path = self.ctx.settings.build_log_path();
        let mut attempt = 1;
        loop {
            match self.stream_build(&request, &log_path).await {
                Ok(()) => break,
                Err(BuildFailure::Transient(e)) if attempt < self.ctx.retry.attempts => {
                    tracing::warn!(
                        "Build of {} hit a transient fault (attempt {}/{}): {}",
                        task.container,
                        attempt,
                        self.ctx.retry.attempts,
                        e
                    );
                    attempt += 1;
                }
                Err(BuildFailure::Transient(e)) => {
                    return Err(Error::RuntimeTransient {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(BuildFailure::Failed { reason, log_tail }) => {
                    self.ctx.hook.on_failure(&task.container, &log_tail).await;
                    return Err(Error::Build {
                        container: task.container.clone(),
                        reason: format!("{} (full log: {})", reason, log_path.display()),
                        log_tail,
                    });
                }
            }
        }

        if config.is_provider(&task.container) {
            VolumeManager::new(self.ctx, self.spec, self.graph)
                .extract(&task.container)
                .await?;
        }
        Ok(())
    }

    /// Run one build attempt, decoding output into the log file and tail.
    async fn stream_build(
        &self,
        request: &BuildRequest,
        log_path: &Path,
    ) -> std::result::Result<(), BuildFailure> {
        let mut log = BuildLog::open(log_path, &request.container).await;
        let mut tail = LogTail::new(self.ctx.settings.build_log_tail);
        let mut decoder = LogDecoder::new();
        let mut builder_error: Option<String> = None;

        let mut stream = match self.ctx.runtime.build(request).await {
            Ok(stream) => stream,
            Err(e) if e.is_transient() => return Err(BuildFailure::Transient(e)),
            Err(e) => {
                return Err(BuildFailure::Failed {
                    reason: e.to_string(),
                    log_tail: Vec::new(),
                })
            }
        };

        let mut stream_error: Option<RuntimeError> = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    for segment in decoder.feed(&chunk) {
                        Self::record(segment, &mut tail, &mut log, &mut builder_error).await;
                    }
                }
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            }
        }
        for segment in decoder.finish() {
            Self::record(segment, &mut tail, &mut log, &mut builder_error).await;
        }

        match (builder_error, stream_error) {
            (None, None) => Ok(()),
            // A transient fault only counts when the builder itself did not fail.
            (None, Some(e)) if e.is_transient() => Err(BuildFailure::Transient(e)),
            (Some(reason), _) => Err(BuildFailure::Failed {
                reason,
                log_tail: tail.lines(),
            }),
            (None, Some(e)) => Err(BuildFailure::Failed {
                reason: e.to_string(),
                log_tail: tail.lines(),
            }),
        }
    }

    async fn record(
        segment: LogSegment,
        tail: &mut LogTail,
        log: &mut BuildLog,
        builder_error: &mut Option<String>,
    ) {
        match segment {
            LogSegment::Line(line) => {
                tracing::debug!("{}", line);
                log.write(&line).await;
                tail.push(line);
            }
            LogSegment::Error(message) => {
                log.write(&message).await;
                tail.push(message.clone());
                builder_error.get_or_insert(message);
            }
            LogSegment::Aux(id) => tracing::debug!("built image {}", id),
        }
    }
}

enum BuildFailure {
    Transient(RuntimeError),
    Failed { reason: String, log_tail: Vec<String> },
}

/// Append-only build log. Write failures are logged once and then ignored.
struct BuildLog {
    file: Option<tokio::fs::File>,
}

impl BuildLog {
    async fn open(path: &Path, container: &str) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!("Cannot create build log directory {}: {}", parent.display(), e);
                return Self { file: None };
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await;
        let mut log = match file {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                tracing::warn!("Cannot open build log {}: {}", path.display(), e);
                Self { file: None }
            }
        };
        let header = format!(
            "=== {} build {} ===",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            container
        );
        log.write(&header).await;
        log
    }

    async fn write(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        if let Err(e) = file.write_all(&bytes).await {
            tracing::warn!("Build log write failed: {}", e);
            self.file = None;
        }
    }
}
