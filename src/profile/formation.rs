use crate::config::{Config, ContainerDefinition};
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Options a container carries after profile resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Some profile in the chain names this container.
    pub in_profile: bool,
    pub default_boot: bool,
    /// Definition environment overlaid with profile environment, leaf wins.
    pub environment: BTreeMap<String, String>,
}

/// The resolved, parent-flattened formation for one invocation.
///
/// Immutable once built; cloning shares the underlying config.
#[derive(Debug, Clone)]
pub struct FormationSpec {
    config: Arc<Config>,
    chain: Vec<String>,
    options: BTreeMap<String, ContainerOptions>,
}

impl FormationSpec {
    pub(crate) fn new(
        config: Arc<Config>,
        chain: Vec<String>,
        options: BTreeMap<String, ContainerOptions>,
    ) -> Self {
        Self {
            config,
            chain,
            options,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_arc(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Profile names, root first. Empty when no profile is active.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Result<&ContainerDefinition> {
        self.config.container(name)
    }

    pub fn options(&self, name: &str) -> Option<&ContainerOptions> {
        self.options.get(name)
    }

    pub fn is_system(&self, name: &str) -> bool {
        self.config
            .containers
            .get(name)
            .is_some_and(|def| def.system)
    }

    /// Containers that `up` boots: the profile's default-boot set.
    pub fn default_boot_set(&self) -> Vec<String> {
        self.options
            .iter()
            .filter(|(_, opts)| opts.default_boot)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Containers that `build` with no arguments targets: everything the
    /// profile names, plus system containers and volume providers.
    pub fn default_build_set(&self) -> Vec<String> {
        self.options
            .iter()
            .filter(|(name, opts)| {
                opts.in_profile || self.is_system(name) || self.config.is_provider(name)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}
