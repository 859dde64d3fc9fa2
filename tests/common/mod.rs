//! In-memory runtime and registry for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bay::dependency::{DependencyGraph, GraphBuilder};
use bay::healthcheck::ReadinessPolicy;
use bay::orchestrator::{BuildOrchestrator, Context};
use bay::runtime::{
    BuildRequest, ChunkStream, ContainerInfo, ContainerRuntime, ImageInfo, Registry,
    RetryPolicy, RunSpec, RuntimeError, VolumeInfo,
};
use bay::{Config, FormationSpec, Parser, ProfileResolver};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct State {
    images: BTreeMap<String, ImageInfo>,
    containers: BTreeMap<String, ContainerInfo>,
    logs: BTreeMap<String, Vec<String>>,
    volumes: BTreeMap<String, VolumeInfo>,
    calls: Vec<String>,
    build_output: BTreeMap<String, Vec<Vec<u8>>>,
    failing_builds: BTreeSet<String>,
    exec_results: BTreeMap<String, VecDeque<i32>>,
    never_ready: BTreeSet<String>,
    next_id: u64,
}

/// Records every call; containers and images live in maps.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls starting with `prefix` (e.g. "build ").
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn next_id(state: &mut State) -> String {
        state.next_id += 1;
        format!("sha256:{:04}", state.next_id)
    }

    pub fn add_image(&self, name: &str, labels: BTreeMap<String, String>) -> String {
        let mut state = self.state.lock();
        let id = Self::next_id(&mut state);
        state.images.insert(
            name.to_string(),
            ImageInfo {
                id: id.clone(),
                tags: vec![name.to_string()],
                labels,
            },
        );
        id
    }

    pub fn image(&self, name: &str) -> Option<ImageInfo> {
        self.state.lock().images.get(name).cloned()
    }

    pub fn add_container(&self, name: &str, running: bool, volumes: &[&str], labels: &[(&str, &str)]) {
        let mut state = self.state.lock();
        let id = Self::next_id(&mut state);
        state.containers.insert(
            name.to_string(),
            ContainerInfo {
                name: name.to_string(),
                id,
                image_id: String::new(),
                running,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                volumes: volumes.iter().map(|v| v.to_string()).collect(),
            },
        );
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn add_volume(&self, name: &str, labels: &[(&str, &str)]) {
        self.state.lock().volumes.insert(
            name.to_string(),
            VolumeInfo {
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
    }

    pub fn volume(&self, name: &str) -> Option<VolumeInfo> {
        self.state.lock().volumes.get(name).cloned()
    }

    pub fn set_logs(&self, container: &str, lines: Vec<String>) {
        self.state.lock().logs.insert(container.to_string(), lines);
    }

    /// Chunks the next build of `container` streams, verbatim.
    pub fn script_build(&self, container: &str, chunks: &[&str]) {
        self.state.lock().build_output.insert(
            container.to_string(),
            chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        );
    }

    pub fn fail_build(&self, container: &str) {
        self.state.lock().failing_builds.insert(container.to_string());
    }

    /// Exit codes returned by successive probes of `container`.
    pub fn script_exec(&self, container: &str, codes: &[i32]) {
        self.state
            .lock()
            .exec_results
            .insert(container.to_string(), codes.iter().copied().collect());
    }

    /// Every probe of `container` exits non-zero.
    pub fn never_ready(&self, container: &str) {
        self.state.lock().never_ready.insert(container.to_string());
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

fn missing(what: &str) -> RuntimeError {
    RuntimeError::Other(format!("No such object: {}", what))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn build(&self, request: &BuildRequest) -> Result<ChunkStream, RuntimeError> {
        self.record(format!("build {}", request.container));
        let mut state = self.state.lock();
        let mut chunks: Vec<Result<Vec<u8>, RuntimeError>> = state
            .build_output
            .get(&request.container)
            .cloned()
            .unwrap_or_else(|| vec![format!("Step 1/1 : building {}\n", request.container).into_bytes()])
            .into_iter()
            .map(Ok)
            .collect();

        if state.failing_builds.contains(&request.container) {
            chunks.push(Err(RuntimeError::Other("image build failed".into())));
        } else {
            let id = Self::next_id(&mut state);
            state.images.insert(
                request.image.clone(),
                ImageInfo {
                    id,
                    tags: vec![request.image.clone()],
                    labels: request.labels.clone(),
                },
            );
        }
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        self.record(format!("run {}", spec.name));
        let mut state = self.state.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Other(format!(
                "Conflict. The container name \"{}\" is already in use",
                spec.name
            )));
        }
        for mount in &spec.mounts {
            state
                .volumes
                .entry(mount.volume.clone())
                .or_insert_with(|| VolumeInfo {
                    name: mount.volume.clone(),
                    labels: BTreeMap::new(),
                });
        }
        let id = Self::next_id(&mut state);
        state.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                name: spec.name.clone(),
                id: id.clone(),
                image_id: spec.image_id.clone(),
                running: true,
                labels: spec.labels.clone(),
                volumes: spec.mounts.iter().map(|m| m.volume.clone()).collect(),
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        Ok(self.state.lock().containers.get(name).cloned())
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageInfo>, RuntimeError> {
        Ok(self.state.lock().images.get(image).cloned())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeInfo>, RuntimeError> {
        Ok(self.state.lock().volumes.get(name).cloned())
    }

    async fn list_containers(
        &self,
        label: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let state = self.state.lock();
        let filter = label.and_then(|l| l.split_once('='));
        Ok(state
            .containers
            .values()
            .filter(|c| match filter {
                Some((k, v)) => c.labels.get(k).map(String::as_str) == Some(v),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn list_images(&self, reference: Option<&str>) -> Result<Vec<ImageInfo>, RuntimeError> {
        let state = self.state.lock();
        Ok(state
            .images
            .iter()
            .filter(|(name, _)| reference.map_or(true, |r| name.starts_with(r)))
            .map(|(_, info)| info.clone())
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        Ok(self.state.lock().volumes.values().cloned().collect())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.record(format!("tag {} {}", source, target));
        let mut state = self.state.lock();
        let image = state.images.get(source).cloned().ok_or_else(|| missing(source))?;
        state.images.insert(target.to_string(), image);
        Ok(())
    }

    async fn stop(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop {}", name));
        let mut state = self.state.lock();
        let container = state.containers.get_mut(name).ok_or_else(|| missing(name))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.containers.remove(name).is_some() {
            state.calls.push(format!("remove {}", name));
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        self.record(format!("create_volume {}", name));
        self.state.lock().volumes.insert(
            name.to_string(),
            VolumeInfo {
                name: name.to_string(),
                labels: labels.clone(),
            },
        );
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_volume {}", name));
        self.state.lock().volumes.remove(name);
        Ok(())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let state = self.state.lock();
        let lines = state.logs.get(name).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn copy_into(
        &self,
        container: &str,
        source: &Path,
        dest: &str,
    ) -> Result<(), RuntimeError> {
        self.record(format!("copy {} {}:{}", source.display(), container, dest));
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        self.record(format!("wait {}", name));
        let mut state = self.state.lock();
        let container = state.containers.get_mut(name).ok_or_else(|| missing(name))?;
        container.running = false;
        Ok(0)
    }

    async fn exec(&self, name: &str, _command: &str) -> Result<i32, RuntimeError> {
        self.record(format!("exec {}", name));
        let mut state = self.state.lock();
        if state.never_ready.contains(name) {
            return Ok(1);
        }
        Ok(state
            .exec_results
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0))
    }
}

/// Registry holding a fixed set of images; pulls land in the fake runtime.
pub struct FakeRegistry {
    runtime: Arc<FakeRuntime>,
    available: Mutex<BTreeSet<String>>,
    pushed: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new(runtime: Arc<FakeRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            available: Mutex::new(BTreeSet::new()),
            pushed: Mutex::new(Vec::new()),
        })
    }

    pub fn offer(&self, image: &str) {
        self.available.lock().insert(image.to_string());
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn login(&self, _registry: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), RuntimeError> {
        self.pushed.lock().push(image.to_string());
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<bool, RuntimeError> {
        if !self.available.lock().contains(image) {
            return Ok(false);
        }
        self.runtime.record(format!("pull {}", image));
        self.runtime.add_image(image, BTreeMap::new());
        Ok(true)
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.available.lock().contains(image))
    }
}

/// A config directory with `bay.yaml` and the given build contexts.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Arc<Config>,
}

impl Fixture {
    pub fn new(yaml: &str, contexts: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        for context in contexts {
            let path = dir.path().join(context);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("Dockerfile"), format!("FROM alpine\nRUN echo {}\n", context))
                .unwrap();
        }
        std::fs::write(dir.path().join("bay.yaml"), yaml).unwrap();
        let mut config = Parser::new()
            .load_config(dir.path().join("bay.yaml"))
            .expect("Failed to load config");
        config.settings.bay.build_log_path = Some(dir.path().join("build.log"));
        Self {
            dir,
            config: Arc::new(config),
        }
    }

    pub fn resolve(&self, profile: Option<&str>) -> (FormationSpec, DependencyGraph) {
        let spec = ProfileResolver::resolve(self.config.clone(), profile)
            .expect("profile resolves")
            .value;
        let graph = GraphBuilder::new(&spec).build().expect("graph builds").value;
        (spec, graph)
    }

    pub fn write(&self, relative: &str, content: &str) {
        std::fs::write(self.dir.path().join(relative), content).unwrap();
    }

    pub fn context(&self, runtime: Arc<FakeRuntime>, registry: Arc<FakeRegistry>) -> Context {
        Context::new(runtime, registry, self.config.settings.bay.clone())
            .expect("context")
            .with_retry(RetryPolicy {
                attempts: 2,
                timeout: Duration::from_secs(5),
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            })
            .with_readiness(ReadinessPolicy {
                reset_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            })
    }

    /// Seed an up-to-date image for a buildable container.
    pub fn seed_built_image(&self, runtime: &FakeRuntime, container: &str) -> String {
        let (spec, graph) = self.resolve(None);
        let scratch = FakeRuntime::new();
        let ctx = self.context(scratch.clone(), FakeRegistry::new(scratch));
        let labels = BuildOrchestrator::new(&ctx, &spec, &graph)
            .fingerprint(container)
            .expect("fingerprint")
            .labels();
        runtime.add_image(&self.config.image_name(container).unwrap(), labels)
    }
}
