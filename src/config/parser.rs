use super::{Config, ProfileDefinition};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_NAMES: [&str; 2] = ["bay.yaml", "bay.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find bay.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load config from file path.
    ///
    /// Resolves the config root, merges profile files from `profiles_dir` and
    /// applies environment overrides. Validation is a separate step.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut config = self.parse_config(&content)?;
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.load_profile_dir(&mut config)?;
        config.settings.bay.apply_env_overrides();

        tracing::debug!(
            "Loaded {} containers, {} volumes, {} profiles from {}",
            config.containers.len(),
            config.volumes.len(),
            config.profiles.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse YAML config: {}", e)))?;

        Ok(config)
    }

    /// Merge `<profiles_dir>/<name>.yaml` files into `config.profiles`.
    ///
    /// Files that fail to parse are recorded in `corrupted_profiles` instead of
    /// aborting, so `bay profiles` can still list the rest.
    fn load_profile_dir(&self, config: &mut Config) -> Result<()> {
        let Some(dir) = config.settings.bay.profiles_dir.clone() else {
            return Ok(());
        };
        let dir = config.root.join(dir);
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "settings.bay.profiles_dir '{}' is not a directory",
                dir.display()
            )));
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
            .collect();
        entries.sort();

        for file in entries {
            let Some(name) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if config.profiles.contains_key(&name) {
                return Err(Error::Config(format!(
                    "Profile '{}' is defined both inline and in {}",
                    name,
                    file.display()
                )));
            }
            let parsed = fs::read_to_string(&file)
                .map_err(|e| e.to_string())
                .and_then(|s| {
                    serde_yaml::from_str::<ProfileDefinition>(&s).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(profile) => {
                    config.profiles.insert(name, profile);
                }
                Err(e) => {
                    tracing::warn!("Profile file {} is corrupted: {}", file.display(), e);
                    config.corrupted_profiles.push(name);
                }
            }
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
containers:
  db:
    image: postgres
    tag: "16"
    system: true
  web:
    build: web
    links:
      required: [db]
    volumes:
      assets: /srv/assets

volumes:
  assets:
    provider: assets

profiles:
  default:
    containers:
      web:
        default_boot: true
"#;

        let parser = Parser::new();
        let config = parser.parse_config(yaml).unwrap();

        assert_eq!(config.containers.len(), 2);
        assert!(config.containers["db"].system);
        assert_eq!(config.containers["web"].links.required[0].target, "db");
        assert!(config.profiles.contains_key("default"));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = Parser::new().parse_config("containers: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
