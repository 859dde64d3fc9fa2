//! Build context digests.
//!
//! A container counts as changed when the digest of its build context differs
//! from the digest label stored on its last built image. A second label records
//! the contexts of everything the image was built against, so a dependency
//! rebuilt in an earlier pass still marks its dependents stale.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Image label holding the context digest the image was built from.
pub const CONTEXT_DIGEST_LABEL: &str = "bay.context-digest";

/// Image label holding the combined context digests of the image's build
/// dependencies.
pub const DEPENDENCY_DIGEST_LABEL: &str = "bay.dependency-digest";

const ALWAYS_IGNORED: [&str; 1] = [".git"];

/// Plain path prefixes from `.dockerignore` (comments and globs skipped).
fn ignore_prefixes(context: &Path) -> Vec<String> {
    let Ok(content) = fs::read_to_string(context.join(".dockerignore")) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter(|l| !l.contains(['*', '?', '[']))
        .map(|l| l.trim_start_matches("./").trim_end_matches('/').to_string())
        .collect()
}

fn is_ignored(rel: &str, prefixes: &[String]) -> bool {
    ALWAYS_IGNORED
        .iter()
        .map(|s| s.to_string())
        .chain(prefixes.iter().cloned())
        .any(|p| rel == p || rel.starts_with(&format!("{}/", p)))
}

/// SHA-256 over the context's file paths and contents, plus the Dockerfile
/// and the build args that will be passed.
///
/// Symlinks are hashed by target and never followed.
pub fn context_digest(
    context: &Path,
    dockerfile: &Path,
    build_args: &BTreeMap<String, String>,
) -> Result<String> {
    let prefixes = ignore_prefixes(context);
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(context)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(context)
                .map(|rel| !is_ignored(&rel.to_string_lossy(), &prefixes))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::Config(format!(
                "Failed to walk build context {}: {}",
                context.display(),
                e
            ))
        })?;
        let rel = entry
            .path()
            .strip_prefix(context)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let file_type = entry.file_type();

        if file_type.is_file() {
            hasher.update(b"F\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hasher.update(fs::read(entry.path())?);
        } else if file_type.is_symlink() {
            hasher.update(b"L\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            let target = fs::read_link(entry.path())?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            hasher.update(b"D\0");
            hasher.update(rel.as_bytes());
        }
        hasher.update(b"\n");
    }

    // The Dockerfile may live outside the context.
    if !dockerfile.starts_with(context) {
        hasher.update(b"DOCKERFILE\0");
        hasher.update(fs::read(dockerfile)?);
    }

    for (key, value) in build_args {
        hasher.update(format!("ARG {}={}\n", key, value).as_bytes());
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Combine `(container, context digest)` pairs into one digest.
///
/// `None` when there are no buildable dependencies. Order does not matter.
pub fn dependency_digest<'a>(
    dependencies: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    let sorted: BTreeMap<&str, &str> = dependencies.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for (container, digest) in sorted {
        hasher.update(format!("{}={}\n", container, digest).as_bytes());
    }
    Some(hex::encode(hasher.finalize()))
}
