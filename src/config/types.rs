//! Root configuration type for `bay.yaml`.

use super::{ContainerDefinition, MountModes, ProfileDefinition, Settings, VolumeDefinition};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerDefinition>,

    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeDefinition>,

    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileDefinition>,

    #[serde(default)]
    pub settings: Settings,

    /// Unknown top-level sections, kept for plugins.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,

    /// Directory holding the config file. Build contexts resolve against it.
    #[serde(skip)]
    pub root: PathBuf,

    /// Profile files under `profiles_dir` that failed to parse.
    #[serde(skip)]
    pub corrupted_profiles: Vec<String>,
}

impl Config {
    pub fn container(&self, name: &str) -> Result<&ContainerDefinition> {
        self.containers
            .get(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }

    pub fn prefix(&self) -> &str {
        &self.settings.bay.prefix
    }

    /// Runtime name of a container: `<prefix>.<container>`.
    pub fn runtime_name(&self, container: &str) -> String {
        format!("{}.{}", self.prefix(), container)
    }

    /// Runtime name of a volume: `<prefix>.<volume>`.
    pub fn volume_runtime_name(&self, volume: &str) -> String {
        format!("{}.{}", self.prefix(), volume)
    }

    pub fn image_name(&self, container: &str) -> Result<String> {
        Ok(self.container(container)?.image_name(self.prefix(), container))
    }

    /// The container that populates `volume`, if any.
    ///
    /// Declared either as `volumes.<v>.provider` or `containers.<c>.provides_volume`.
    pub fn provider_of(&self, volume: &str) -> Option<&str> {
        if let Some(provider) = self.volumes.get(volume).and_then(|v| v.provider.as_deref()) {
            return Some(provider);
        }
        self.containers
            .iter()
            .find(|(_, def)| def.provides_volume.as_deref() == Some(volume))
            .map(|(name, _)| name.as_str())
    }

    /// Volume this container provides, from either declaration side.
    pub fn provided_volume(&self, container: &str) -> Option<&str> {
        if let Some(def) = self.containers.get(container) {
            if let Some(volume) = def.provides_volume.as_deref() {
                return Some(volume);
            }
        }
        self.volumes
            .iter()
            .find(|(_, v)| v.provider.as_deref() == Some(container))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_provider(&self, container: &str) -> bool {
        self.provided_volume(container).is_some()
    }

    /// Every volume referenced by a mount or declared, sorted.
    pub fn volume_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.volumes.keys().cloned().collect();
        for def in self.containers.values() {
            for volume in def.volumes.keys() {
                if !names.contains(volume) {
                    names.push(volume.clone());
                }
            }
        }
        names.sort();
        names
    }

    /// Containers declaring a mount of `volume`, sorted.
    pub fn mounting_containers(&self, volume: &str) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, def)| def.volumes.contains_key(volume))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Union of the volume's declared modes and every mount's modes.
    pub fn volume_modes(&self, volume: &str) -> MountModes {
        let mut modes = self
            .volumes
            .get(volume)
            .map(|v| v.modes.clone())
            .unwrap_or_default();
        for def in self.containers.values() {
            if let Some(mount) = def.volumes.get(volume) {
                modes.extend(&mount.modes);
            }
        }
        modes
    }

    /// Effective modes of `container`'s mount of `volume`.
    ///
    /// The volume's declared modes and the shared modes of every mount, plus
    /// whatever this mount declares itself.
    pub fn mount_modes(&self, container: &str, volume: &str) -> MountModes {
        let mut modes = self
            .volumes
            .get(volume)
            .map(|v| v.modes.clone())
            .unwrap_or_default();
        for (name, def) in &self.containers {
            let Some(mount) = def.volumes.get(volume) else {
                continue;
            };
            if name == container {
                modes.extend(&mount.modes);
            } else {
                modes.extend(&mount.modes.shared());
            }
        }
        modes
    }

    /// Containers marked `system: true`, sorted.
    pub fn system_containers(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(_, def)| def.system)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountMode;

    fn config(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_provider_from_either_side() {
        let cfg = config(
            r#"
containers:
  assets-builder:
    build: assets
    provides_volume: assets
  static-builder:
    build: static
volumes:
  static:
    provider: static-builder
"#,
        );
        assert_eq!(cfg.provider_of("assets"), Some("assets-builder"));
        assert_eq!(cfg.provider_of("static"), Some("static-builder"));
        assert_eq!(cfg.provided_volume("static-builder"), Some("static"));
        assert!(cfg.is_provider("assets-builder"));
        assert_eq!(cfg.provider_of("missing"), None);
    }

    #[test]
    fn test_volume_modes_union_across_mounts() {
        let cfg = config(
            r#"
containers:
  web:
    volumes:
      code: {path: /srv, modes: [cached]}
  worker:
    volumes:
      code: {path: /srv, modes: [cached, ro]}
"#,
        );
        let modes = cfg.volume_modes("code");
        assert_eq!(modes.len(), 2);
        assert_eq!(cfg.mounting_containers("code"), vec!["web", "worker"]);
        assert_eq!(cfg.volume_names(), vec!["code"]);
    }

    #[test]
    fn test_read_only_stays_on_its_own_mount() {
        let cfg = config(
            r#"
containers:
  web:
    volumes:
      data: /data
  reader:
    volumes:
      data: {path: /data, modes: [ro, delegated]}
"#,
        );
        let writer = cfg.mount_modes("web", "data");
        assert!(!writer.contains(MountMode::ReadOnly));
        assert!(writer.contains(MountMode::Delegated));
        assert_eq!(cfg.mount_modes("reader", "data").len(), 2);
        assert_eq!(cfg.volume_modes("data").len(), 2);
    }

    #[test]
    fn test_unknown_sections_kept() {
        let cfg = config("containers: {}\nssh:\n  agent: true\n");
        assert!(cfg.extra.contains_key("ssh"));
    }

    #[test]
    fn test_runtime_names_use_prefix() {
        let cfg = config("settings:\n  bay:\n    prefix: shop\ncontainers:\n  web: {}\n");
        assert_eq!(cfg.runtime_name("web"), "shop.web");
        assert_eq!(cfg.image_name("web").unwrap(), "shop/web:latest");
        assert!(matches!(cfg.image_name("nope"), Err(Error::ContainerNotFound(_))));
    }
}
