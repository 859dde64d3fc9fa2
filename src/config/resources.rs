//! Memory limit parsing.
//!
//! `mem_limit` values such as `"512m"`, `"2g"` or `"1024mb"` are validated at
//! load time and normalized to a byte count so the runtime and the
//! configuration digest always see the same number.

use crate::error::{Error, Result};

const KIB: f64 = 1024.0;

/// Parse a memory limit into bytes.
///
/// Accepts a positive number followed by an optional unit: `b`, `k`/`kb`,
/// `m`/`mb`, `g`/`gb` (case-insensitive). Values below 4KB are rejected.
pub fn parse_memory_limit(memory: &str) -> std::result::Result<u64, String> {
    let memory = memory.trim();
    if memory.is_empty() {
        return Err("memory string cannot be empty".to_string());
    }

    if !memory.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err("memory string must start with a number".to_string());
    }

    let suffix_start = memory
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(memory.len());
    let (num_part, suffix) = memory.split_at(suffix_start);

    let value: f64 = num_part
        .parse()
        .map_err(|_| format!("invalid numeric value '{}'", num_part))?;
    if value <= 0.0 {
        return Err("memory value must be positive".to_string());
    }

    let multiplier = match suffix.to_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => KIB,
        "m" | "mb" => KIB * KIB,
        "g" | "gb" => KIB * KIB * KIB,
        other => {
            return Err(format!(
                "unknown unit '{}' (use b, k, m or g)",
                other
            ))
        }
    };

    let bytes = value * multiplier;
    if bytes < 4.0 * KIB {
        return Err("memory must be at least 4KB".to_string());
    }
    Ok(bytes as u64)
}

/// Validate `mem_limit` for a container and return its byte count.
pub fn container_memory_bytes(container: &str, mem_limit: Option<&str>) -> Result<Option<u64>> {
    mem_limit
        .map(|raw| {
            parse_memory_limit(raw).map_err(|e| {
                Error::Config(format!(
                    "Container '{}': invalid mem_limit '{}': {}",
                    container, raw, e
                ))
            })
        })
        .transpose()
}
