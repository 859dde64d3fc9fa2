//! Volumes, mounts and mount modes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single bind/volume mount option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Cached,
    Delegated,
    Consistent,
    #[serde(rename = "ro", alias = "readonly")]
    ReadOnly,
}

impl MountMode {
    /// Caching and consistency modes describe the volume and apply to every
    /// mount of it. Read-only access belongs to the mount that asks for it.
    pub fn is_shared(&self) -> bool {
        !matches!(self, MountMode::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::Cached => "cached",
            MountMode::Delegated => "delegated",
            MountMode::Consistent => "consistent",
            MountMode::ReadOnly => "ro",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of mount modes. Adding a mode twice keeps one copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountModes(BTreeSet<MountMode>);

impl MountModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the mode was not present yet.
    pub fn add(&mut self, mode: MountMode) -> bool {
        self.0.insert(mode)
    }

    pub fn extend(&mut self, other: &MountModes) {
        self.0.extend(other.0.iter().copied());
    }

    /// The modes that carry over to other mounts of the same volume.
    pub fn shared(&self) -> MountModes {
        self.iter().filter(MountMode::is_shared).collect()
    }

    pub fn contains(&self, mode: MountMode) -> bool {
        self.0.contains(&mode)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MountMode> + '_ {
        self.0.iter().copied()
    }

    /// Comma-joined option suffix for `-v name:/path:<options>`.
    pub fn to_option_string(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(
                self.0
                    .iter()
                    .map(MountMode::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }
}

impl FromIterator<MountMode> for MountModes {
    fn from_iter<I: IntoIterator<Item = MountMode>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Mount of a named volume inside a container.
///
/// Written either as a bare path or as `{path, modes}`:
///
/// ```yaml
/// volumes:
///   node_modules: /srv/app/node_modules
///   assets:
///     path: /srv/assets
///     modes: [cached, ro]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VolumeMountRepr")]
pub struct VolumeMount {
    pub path: String,
    #[serde(default, skip_serializing_if = "MountModes::is_empty")]
    pub modes: MountModes,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VolumeMountRepr {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        modes: MountModes,
    },
}

impl From<VolumeMountRepr> for VolumeMount {
    fn from(repr: VolumeMountRepr) -> Self {
        match repr {
            VolumeMountRepr::Path(path) => VolumeMount {
                path,
                modes: MountModes::new(),
            },
            VolumeMountRepr::Full { path, modes } => VolumeMount { path, modes },
        }
    }
}

/// A named volume declared at the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    /// Container whose built image populates this volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Modes applied to every mount of this volume.
    #[serde(default, skip_serializing_if = "MountModes::is_empty")]
    pub modes: MountModes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut modes = MountModes::new();
        assert!(modes.add(MountMode::Cached));
        assert!(!modes.add(MountMode::Cached));
        assert_eq!(modes.len(), 1);
    }

    #[test]
    fn test_yaml_duplicates_collapse() {
        let modes: MountModes = serde_yaml::from_str("[cached, cached, ro]").unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes.to_option_string().as_deref(), Some("cached,ro"));
    }

    #[test]
    fn test_mount_short_form() {
        let mount: VolumeMount = serde_yaml::from_str("/srv/data").unwrap();
        assert_eq!(mount.path, "/srv/data");
        assert!(mount.modes.is_empty());
    }

    #[test]
    fn test_mount_long_form() {
        let mount: VolumeMount =
            serde_yaml::from_str("path: /srv/data\nmodes: [delegated]").unwrap();
        assert!(mount.modes.contains(MountMode::Delegated));
    }
}
