//! Container definitions.

use super::{ReadinessProbe, VolumeMount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_tag() -> String {
    "latest".to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A link to another container, optionally reachable under an alias.
///
/// Written as `db`, `db:database`, or `{target: db, alias: database}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LinkRepr")]
pub struct Link {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Link {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            alias: None,
        }
    }

    /// Hostname the linking container sees.
    pub fn hostname(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.target)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LinkRepr {
    Short(String),
    Full {
        target: String,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl From<LinkRepr> for Link {
    fn from(repr: LinkRepr) -> Self {
        match repr {
            LinkRepr::Short(s) => match s.split_once(':') {
                Some((target, alias)) => Link {
                    target: target.trim().to_string(),
                    alias: Some(alias.trim().to_string()),
                },
                None => Link::new(s.trim()),
            },
            LinkRepr::Full { target, alias } => Link { target, alias },
        }
    }
}

/// Required links must resolve; optional links are used only when the target
/// is part of the formation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<Link>,
}

impl Links {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

/// One entry under `containers:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    /// Build context directory, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PathBuf>,

    /// Dockerfile path relative to the build context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    /// Image repository. Defaults to `<prefix>/<container>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default = "default_tag")]
    pub tag: String,

    /// Container whose image this one is built `FROM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Links::is_empty")]
    pub links: Links,

    /// Named volume → mount.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeMount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub system: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessProbe>,

    /// Values offered to the build. Passed only for `ARG`s the Dockerfile declares.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Name of the volume this container's image populates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides_volume: Option<String>,
}

impl ContainerDefinition {
    /// `repository:tag` for this container's image.
    pub fn image_name(&self, prefix: &str, name: &str) -> String {
        let tag = if self.tag.is_empty() { "latest" } else { &self.tag };
        match &self.image {
            Some(image) if image.contains(':') => image.clone(),
            Some(image) => format!("{}:{}", image, tag),
            None => format!("{}/{}:{}", prefix, name, tag),
        }
    }

    /// Whether bay builds this image (as opposed to only pulling it).
    pub fn is_buildable(&self) -> bool {
        self.build.is_some()
    }

    pub fn build_context(&self, root: &Path) -> Option<PathBuf> {
        self.build.as_ref().map(|dir| root.join(dir))
    }

    pub fn dockerfile_path(&self, root: &Path) -> Option<PathBuf> {
        self.build_context(root).map(|ctx| {
            ctx.join(self.dockerfile.as_deref().unwrap_or("Dockerfile"))
        })
    }

    /// Every link target, required first.
    pub fn link_targets(&self) -> impl Iterator<Item = (&Link, bool)> {
        self.links
            .required
            .iter()
            .map(|l| (l, true))
            .chain(self.links.optional.iter().map(|l| (l, false)))
    }
}
