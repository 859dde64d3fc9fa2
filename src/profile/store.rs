use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<String>,
}

/// The per-checkout profile selection, kept in `.bay/profile.yaml` next to
/// the config file.
pub struct UserProfileStore {
    path: PathBuf,
}

impl UserProfileStore {
    pub fn new(config_root: &Path) -> Self {
        Self {
            path: config_root.join(".bay").join("profile.yaml"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved profile name, or `None` if nothing was ever selected.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let user: UserProfile = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "User profile {} is corrupted: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(user.profile)
    }

    pub fn save(&self, profile: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_yaml::to_string(&UserProfile {
            profile: Some(profile.to_string()),
        })?;
        fs::write(&self.path, content)?;
        tracing::debug!("Saved user profile '{}' to {}", profile, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserProfileStore::new(dir.path());
        assert_eq!(store.load().unwrap(), None);

        store.save("frontend").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("frontend"));
        assert!(dir.path().join(".bay/profile.yaml").exists());
    }
}
