use super::{ContainerOptions, FormationSpec};
use crate::config::{Config, ProfileContainerOptions};
use crate::diagnostics::{Checked, Warning};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Resolves a profile and its ancestors into a [`FormationSpec`].
pub struct ProfileResolver<'a> {
    config: &'a Config,
}

impl<'a> ProfileResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Parent chain of `profile`, root first.
    pub fn chain(&self, profile: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = profile.to_string();

        loop {
            if !seen.insert(current.clone()) {
                chain.push(current.clone());
                let start = chain.iter().position(|p| *p == current).unwrap_or(0);
                return Err(Error::ProfileResolution {
                    profile: profile.to_string(),
                    reason: format!("inheritance cycle {}", chain[start..].join(" -> ")),
                });
            }

            let definition = self.config.profiles.get(&current).ok_or_else(|| {
                let reason = if current == profile {
                    "profile is not defined".to_string()
                } else {
                    format!(
                        "parent '{}' of '{}' is not defined",
                        current,
                        chain.last().map(String::as_str).unwrap_or(profile)
                    )
                };
                Error::ProfileResolution {
                    profile: profile.to_string(),
                    reason,
                }
            })?;

            chain.push(current.clone());
            match &definition.parent {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Resolve `profile` (or no profile) against `config`.
    ///
    /// Every declared container appears in the result; containers no profile
    /// names have `in_profile == false`.
    pub fn resolve(
        config: Arc<Config>,
        profile: Option<&str>,
    ) -> Result<Checked<FormationSpec>> {
        let resolver = ProfileResolver::new(&config);
        let chain = match profile {
            Some(name) => resolver.chain(name)?,
            None => Vec::new(),
        };

        let mut warnings = Vec::new();
        let mut merged: BTreeMap<String, ProfileContainerOptions> = BTreeMap::new();
        for name in &chain {
            let Some(definition) = config.profiles.get(name) else {
                continue;
            };
            for (container, overrides) in &definition.containers {
                if !config.containers.contains_key(container) {
                    warnings.push(Warning::validation(format!(
                        "Profile '{}' names container '{}', which is not defined; ignoring it",
                        name, container
                    )));
                    continue;
                }
                let entry = merged.entry(container.clone()).or_default();
                if overrides.default_boot.is_some() {
                    entry.default_boot = overrides.default_boot;
                }
                entry.environment.extend(
                    overrides
                        .environment
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
        }

        let options = config
            .containers
            .iter()
            .map(|(name, def)| {
                let profile_opts = merged.get(name);
                let mut environment = def.environment.clone();
                if let Some(p) = profile_opts {
                    environment.extend(p.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                let opts = ContainerOptions {
                    in_profile: profile_opts.is_some(),
                    default_boot: profile_opts.and_then(|p| p.default_boot).unwrap_or(false),
                    environment,
                };
                (name.clone(), opts)
            })
            .collect();

        if let Some(active) = chain.last() {
            tracing::debug!("Resolved profile chain: {}", chain.join(" -> "));
            tracing::info!("Using profile '{}'", active);
        }

        Ok(Checked::with_warnings(
            FormationSpec::new(Arc::clone(&config), chain, options),
            warnings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parser;

    fn config(yaml: &str) -> Arc<Config> {
        Arc::new(Parser::new().parse_config(yaml).unwrap())
    }

    const CHAIN: &str = r#"
containers:
  web: {}
  db: {}
profiles:
  base:
    containers:
      web:
        default_boot: true
  mid:
    parent: base
  leaf:
    parent: mid
"#;

    #[test]
    fn test_chain_is_root_first() {
        let cfg = config(CHAIN);
        let chain = ProfileResolver::new(&cfg).chain("leaf").unwrap();
        assert_eq!(chain, vec!["base", "mid", "leaf"]);
    }

    #[test]
    fn test_missing_parent() {
        let cfg = config("profiles:\n  child:\n    parent: ghost\n");
        let err = ProfileResolver::new(&cfg).chain("child").unwrap_err();
        match err {
            Error::ProfileResolution { profile, reason } => {
                assert_eq!(profile, "child");
                assert!(reason.contains("ghost"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let cfg = config("profiles:\n  a:\n    parent: b\n  b:\n    parent: a\n");
        let err = ProfileResolver::new(&cfg).chain("a").unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_unknown_container_is_warning() {
        let cfg = config("containers:\n  web: {}\nprofiles:\n  p:\n    containers:\n      ghost:\n");
        let checked = ProfileResolver::resolve(cfg, Some("p")).unwrap();
        assert_eq!(checked.warnings.len(), 1);
        assert!(!checked.value.contains("ghost"));
    }

    #[test]
    fn test_no_profile_resolves_everything_out_of_profile() {
        let checked = ProfileResolver::resolve(config(CHAIN), None).unwrap();
        let spec = checked.value;
        assert!(spec.chain().is_empty());
        assert!(spec.default_boot_set().is_empty());
        assert!(!spec.options("web").unwrap().in_profile);
    }
}
