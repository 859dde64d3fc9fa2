use super::{container_memory_bytes, Config};
use crate::diagnostics::{Checked, Warning};
use crate::error::{Error, Result};

impl Config {
    /// Validate the configuration.
    ///
    /// Structural problems that would make any pass meaningless are errors.
    /// Questionable but workable input comes back as warnings. Link targets
    /// are checked later by the graph builder, which knows the formation.
    pub fn validate(&self) -> Result<Checked<()>> {
        let mut checked = Checked::new(());

        self.settings.bay.validate()?;

        for (name, def) in &self.containers {
            validate_name("container", name)?;
            container_memory_bytes(name, def.mem_limit.as_deref())?;

            if let Some(probe) = &def.readiness {
                if !probe.timeout_is_valid() {
                    return Err(Error::Config(format!(
                        "Container '{}': readiness timeout is not a valid duration",
                        name
                    )));
                }
                if let Some(url) = probe.http_url() {
                    crate::healthcheck::HttpChecker::validate_url(url).map_err(|e| {
                        Error::Config(format!("Container '{}': {}", name, e))
                    })?;
                }
            }

            if let Some(parent) = &def.from {
                if parent == name {
                    return Err(Error::DependencyCycle(vec![name.clone(), name.clone()]));
                }
                let parent_def = self.containers.get(parent).ok_or_else(|| {
                    Error::Config(format!(
                        "Container '{}' is built from '{}', which is not defined",
                        name, parent
                    ))
                })?;
                if !parent_def.is_buildable() {
                    return Err(Error::Config(format!(
                        "Container '{}' is built from '{}', which has no build context",
                        name, parent
                    )));
                }
            }

            if def.from.is_some() && !def.is_buildable() {
                return Err(Error::Config(format!(
                    "Container '{}' declares `from` but has no build context",
                    name
                )));
            }

            for volume in def.volumes.keys() {
                if !self.volumes.contains_key(volume) && self.provider_of(volume).is_none() {
                    checked.warn(Warning::validation(format!(
                        "Container '{}' mounts undeclared volume '{}'; it will be created empty on first use",
                        name, volume
                    )));
                }
            }
        }

        for name in self.volumes.keys() {
            validate_name("volume", name)?;
        }

        self.validate_providers()?;

        Ok(checked)
    }

    fn validate_providers(&self) -> Result<()> {
        for (volume, def) in &self.volumes {
            let Some(provider) = &def.provider else {
                continue;
            };
            let container = self.containers.get(provider).ok_or_else(|| {
                Error::Config(format!(
                    "Volume '{}' is provided by '{}', which is not defined",
                    volume, provider
                ))
            })?;
            if let Some(other) = &container.provides_volume {
                if other != volume {
                    return Err(Error::Config(format!(
                        "Container '{}' is declared as provider of both '{}' and '{}'",
                        provider, volume, other
                    )));
                }
            }
        }

        for (name, def) in &self.containers {
            let Some(volume) = &def.provides_volume else {
                continue;
            };
            if !def.is_buildable() {
                return Err(Error::Config(format!(
                    "Container '{}' provides volume '{}' but has no build context",
                    name, volume
                )));
            }
            if let Some(declared) = self.volumes.get(volume).and_then(|v| v.provider.as_deref()) {
                if declared != name {
                    return Err(Error::Config(format!(
                        "Volume '{}' has two providers: '{}' and '{}'",
                        volume, declared, name
                    )));
                }
            }
            if def.volumes.contains_key(volume) {
                return Err(Error::Config(format!(
                    "Container '{}' cannot mount the volume '{}' it provides",
                    name, volume
                )));
            }
        }
        Ok(())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid {} name '{}': use letters, digits, '-', '_' or '.'",
            kind, name
        )))
    }
}
