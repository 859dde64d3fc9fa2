use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

fn arg_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^\s*ARG\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex pattern is valid")
    })
}

/// Names of every `ARG` a Dockerfile declares.
pub fn declared_args(dockerfile: &str) -> BTreeSet<String> {
    arg_pattern()
        .captures_iter(dockerfile)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Keep only the offered build args the Dockerfile declares.
pub fn applicable_build_args(
    offered: &BTreeMap<String, String>,
    dockerfile: &Path,
) -> Result<BTreeMap<String, String>> {
    if offered.is_empty() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(dockerfile).map_err(|e| {
        Error::Config(format!(
            "Failed to read Dockerfile '{}': {}",
            dockerfile.display(),
            e
        ))
    })?;
    let declared = declared_args(&content);
    Ok(offered
        .iter()
        .filter(|(name, _)| declared.contains(*name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}
