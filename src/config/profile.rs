//! Profile definitions as written in YAML.
//!
//! Resolution (parent chains, merging) lives in [`crate::profile`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-container overrides inside a profile. Unset keys inherit from the
/// parent profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileContainerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_boot: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Container name → overrides. A `null` entry selects the container with
    /// no overrides.
    #[serde(default, deserialize_with = "deserialize_container_options")]
    pub containers: BTreeMap<String, ProfileContainerOptions>,
}

fn deserialize_container_options<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, ProfileContainerOptions>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: BTreeMap<String, Option<ProfileContainerOptions>> =
        Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, opts)| (name, opts.unwrap_or_default()))
        .collect())
}
