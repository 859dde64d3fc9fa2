//! Profile inheritance and the resolved formation.

mod formation;
mod resolver;
mod store;

pub use formation::{ContainerOptions, FormationSpec};
pub use resolver::ProfileResolver;
pub use store::UserProfileStore;

use crate::config::{Config, ENV_PROFILE};
use crate::error::Result;

/// Pick the active profile.
///
/// Precedence: explicit flag, `BAY_PROFILE`, the saved user profile, then
/// `settings.bay.default_profile`.
pub fn active_profile_name(config: &Config, explicit: Option<&str>) -> Result<Option<String>> {
    if let Some(name) = explicit {
        return Ok(Some(name.to_string()));
    }
    if let Ok(name) = std::env::var(ENV_PROFILE) {
        if !name.trim().is_empty() {
            return Ok(Some(name.trim().to_string()));
        }
    }
    if let Some(name) = UserProfileStore::new(&config.root).load()? {
        return Ok(Some(name));
    }
    Ok(config.settings.bay.default_profile.clone())
}
