//! Volume provisioning, provider extraction and safe destroy.

use super::build::BuildOrchestrator;
use super::{Context, BUILD_ID_LABEL, PREFIX_LABEL};
use crate::config::MountModes;
use crate::dependency::{boot_orders, DependencyGraph, Node};
use crate::error::{Error, Result};
use crate::profile::FormationSpec;
use crate::runtime::{call_runtime, ContainerInfo, MountSpec, RunSpec};
use std::collections::{BTreeMap, BTreeSet};

/// Where provider images unpack their payload.
pub const EXTRACT_PATH: &str = "/volume/";

/// One row of `bay volume list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRow {
    pub name: String,
    pub runtime_name: String,
    pub provider: Option<String>,
    pub modes: MountModes,
    pub exists: bool,
    pub build_id: Option<String>,
    pub users: Vec<String>,
}

/// One row of `bay mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRow {
    pub container: String,
    pub volume: String,
    pub path: String,
    pub modes: MountModes,
}

pub struct VolumeManager<'a> {
    ctx: &'a Context,
    spec: &'a FormationSpec,
    graph: &'a DependencyGraph,
}

impl<'a> VolumeManager<'a> {
    pub fn new(ctx: &'a Context, spec: &'a FormationSpec, graph: &'a DependencyGraph) -> Self {
        Self { ctx, spec, graph }
    }

    /// Runtime mounts for `container`. Shared modes of a volume reach every
    /// mount; `ro` only the mounts that declare it.
    pub fn mount_specs(&self, container: &str) -> Result<Vec<MountSpec>> {
        let config = self.spec.config();
        let def = config.container(container)?;
        Ok(def
            .volumes
            .iter()
            .map(|(volume, mount)| MountSpec {
                volume: config.volume_runtime_name(volume),
                path: mount.path.clone(),
                modes: config.mount_modes(container, volume),
            })
            .collect())
    }

    /// Declared mounts of containers outside the active profile; every
    /// container's when no profile is active.
    pub fn mounts(&self) -> Vec<MountRow> {
        let config = self.spec.config();
        let profile_active = self.spec.active_profile().is_some();
        let mut rows = Vec::new();
        for name in self.spec.container_names() {
            let in_profile = self.spec.options(name).is_some_and(|o| o.in_profile);
            if profile_active && in_profile {
                continue;
            }
            let Some(def) = config.containers.get(name) else {
                continue;
            };
            for (volume, mount) in &def.volumes {
                rows.push(MountRow {
                    container: name.to_string(),
                    volume: volume.clone(),
                    path: mount.path.clone(),
                    modes: config.mount_modes(name, volume),
                });
            }
        }
        rows
    }

    /// Containers, running or not, that currently have `volume` mounted.
    pub async fn users(&self, volume: &str) -> Result<Vec<ContainerInfo>> {
        let runtime_name = self.spec.config().volume_runtime_name(volume);
        let all = call_runtime(&self.ctx.retry, "list containers", || {
            self.ctx.runtime.list_containers(None)
        })
        .await?;
        Ok(all
            .into_iter()
            .filter(|c| c.volumes.iter().any(|v| *v == runtime_name))
            .collect())
    }

    pub async fn list(&self) -> Result<Vec<VolumeRow>> {
        let config = self.spec.config();
        let mut rows = Vec::new();
        for volume in config.volume_names() {
            let runtime_name = config.volume_runtime_name(&volume);
            let info = call_runtime(&self.ctx.retry, "inspect volume", || {
                self.ctx.runtime.inspect_volume(&runtime_name)
            })
            .await?;
            let users = self
                .users(&volume)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            rows.push(VolumeRow {
                provider: config.provider_of(&volume).map(str::to_string),
                modes: config.volume_modes(&volume),
                exists: info.is_some(),
                build_id: info.and_then(|i| i.labels.get(BUILD_ID_LABEL).cloned()),
                users,
                runtime_name,
                name: volume,
            });
        }
        Ok(rows)
    }

    /// Make sure `volume` exists before something mounts it.
    ///
    /// Provided volumes get their provider built (when its image is missing)
    /// and extracted; plain volumes are created empty.
    pub async fn ensure(&self, volume: &str, builder: &BuildOrchestrator<'_>) -> Result<()> {
        let config = self.spec.config();
        let runtime_name = config.volume_runtime_name(volume);

        if let Some(provider) = config.provider_of(volume) {
            let image = config.image_name(provider)?;
            let present = call_runtime(&self.ctx.retry, "inspect image", || {
                self.ctx.runtime.inspect_image(&image)
            })
            .await?
            .is_some();
            if !present {
                tracing::info!("Building provider '{}' for volume '{}'", provider, volume);
                // A provider build extracts its volume on success.
                builder.build_missing(&[provider.to_string()]).await?;
                return Ok(());
            }
            self.extract(provider).await?;
            return Ok(());
        }

        let exists = call_runtime(&self.ctx.retry, "inspect volume", || {
            self.ctx.runtime.inspect_volume(&runtime_name)
        })
        .await?
        .is_some();
        if !exists {
            tracing::info!("Creating volume {}", runtime_name);
            let labels = BTreeMap::from([(PREFIX_LABEL.to_string(), config.prefix().to_string())]);
            call_runtime(&self.ctx.retry, "create volume", || {
                self.ctx.runtime.create_volume(&runtime_name, &labels)
            })
            .await?;
        }
        Ok(())
    }

    /// Unpack `provider`'s image into its volume when the volume was filled
    /// from a different image. Returns whether extraction ran.
    pub async fn extract(&self, provider: &str) -> Result<bool> {
        let config = self.spec.config();
        let Some(volume) = config.provided_volume(provider) else {
            return Ok(false);
        };
        let volume_name = config.volume_runtime_name(volume);
        let image = config.image_name(provider)?;

        let image_id = call_runtime(&self.ctx.retry, "inspect image", || {
            self.ctx.runtime.inspect_image(&image)
        })
        .await?
        .map(|i| i.id)
        .ok_or_else(|| Error::Build {
            container: provider.to_string(),
            reason: format!("image '{}' is missing after build", image),
            log_tail: Vec::new(),
        })?;

        let current = call_runtime(&self.ctx.retry, "inspect volume", || {
            self.ctx.runtime.inspect_volume(&volume_name)
        })
        .await?;
        let up_to_date = current
            .as_ref()
            .and_then(|v| v.labels.get(BUILD_ID_LABEL))
            .is_some_and(|id| *id == image_id);
        if up_to_date {
            tracing::debug!("Volume {} already holds {}", volume_name, image_id);
            return Ok(false);
        }

        // Stale users would keep the old payload mounted.
        for user in self.users(volume).await? {
            if user.running {
                self.ctx.stop_container(&user.name).await?;
            }
            self.ctx.remove_container(&user.name).await?;
        }

        if current.is_some() {
            call_runtime(&self.ctx.retry, "remove volume", || {
                self.ctx.runtime.remove_volume(&volume_name)
            })
            .await?;
        }
        let labels = BTreeMap::from([
            (BUILD_ID_LABEL.to_string(), image_id.clone()),
            (PREFIX_LABEL.to_string(), config.prefix().to_string()),
        ]);
        call_runtime(&self.ctx.retry, "create volume", || {
            self.ctx.runtime.create_volume(&volume_name, &labels)
        })
        .await?;

        tracing::info!("Extracting {} into volume {}", image, volume_name);
        let extractor = format!("{}.extract", config.runtime_name(provider));
        let run = RunSpec {
            name: extractor.clone(),
            image: image.clone(),
            image_id,
            environment: BTreeMap::new(),
            mounts: vec![MountSpec {
                volume: volume_name.clone(),
                path: EXTRACT_PATH.to_string(),
                modes: MountModes::new(),
            }],
            links: Vec::new(),
            mem_limit: None,
            ports: Vec::new(),
            command: None,
            labels: BTreeMap::from([(PREFIX_LABEL.to_string(), config.prefix().to_string())]),
        };

        // A leftover extractor from an interrupted run would block the name.
        self.ctx.remove_container(&extractor).await?;
        call_runtime(&self.ctx.retry, "run", || self.ctx.runtime.run(&run)).await?;
        // Extraction can take longer than a single runtime call.
        let exit = self
            .ctx
            .runtime
            .wait(&extractor)
            .await
            .map_err(Error::Runtime)?;
        let log_tail = if exit != 0 {
            self.ctx
                .runtime
                .logs(&extractor, self.ctx.settings.build_log_tail)
                .await
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        self.ctx.remove_container(&extractor).await?;

        if exit != 0 {
            return Err(Error::Build {
                container: provider.to_string(),
                reason: format!("volume extraction exited with {}", exit),
                log_tail,
            });
        }
        Ok(true)
    }

    /// Remove `volume`, first stopping and removing its users.
    ///
    /// `scope` names the containers this operation may touch. When any user
    /// falls outside it, nothing is stopped or removed.
    pub async fn destroy(&self, volume: &str, scope: &BTreeSet<String>) -> Result<()> {
        let config = self.spec.config();
        let volume_name = config.volume_runtime_name(volume);
        let users = self.users(volume).await?;

        let by_runtime_name: BTreeMap<String, &str> = config
            .containers
            .keys()
            .map(|name| (config.runtime_name(name), name.as_str()))
            .collect();

        let blockers: Vec<String> = users
            .iter()
            .filter(|u| {
                by_runtime_name
                    .get(&u.name)
                    .map_or(true, |logical| !scope.contains(*logical))
            })
            .map(|u| u.name.clone())
            .collect();
        if !blockers.is_empty() {
            return Err(Error::VolumeInUse {
                volume: volume.to_string(),
                blockers,
            });
        }

        // Dependents first: reverse of the boot order over the users.
        let user_nodes: BTreeSet<Node> = users
            .iter()
            .filter_map(|u| by_runtime_name.get(&u.name))
            .map(|logical| Node::container(*logical))
            .collect();
        let mut order = self.graph.topological_sort(&user_nodes, boot_orders)?;
        order.reverse();

        let running: BTreeMap<&str, bool> =
            users.iter().map(|u| (u.name.as_str(), u.running)).collect();
        for node in order {
            let runtime_name = config.runtime_name(node.name());
            if running.get(runtime_name.as_str()).copied().unwrap_or(false) {
                self.ctx.stop_container(&runtime_name).await?;
            }
            self.ctx.remove_container(&runtime_name).await?;
        }

        call_runtime(&self.ctx.retry, "remove volume", || {
            self.ctx.runtime.remove_volume(&volume_name)
        })
        .await?;
        tracing::info!("Removed volume {}", volume_name);
        Ok(())
    }

    /// Containers `destroy` may touch by default: every formation container
    /// that declares a mount of `volume`.
    pub fn default_scope(&self, volume: &str) -> BTreeSet<String> {
        self.spec
            .config()
            .mounting_containers(volume)
            .into_iter()
            .collect()
    }
}
