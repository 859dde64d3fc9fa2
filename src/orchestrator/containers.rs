use super::Context;
use crate::error::{Error, Result};
use crate::profile::FormationSpec;
use crate::runtime::call_runtime;
use std::path::Path;

/// Lines `tail` shows when none are requested.
pub const DEFAULT_TAIL_LINES: usize = 10;

/// The last `lines` lines of a container's output.
pub async fn tail(
    ctx: &Context,
    spec: &FormationSpec,
    container: &str,
    lines: Option<usize>,
) -> Result<Vec<String>> {
    if !spec.contains(container) {
        return Err(Error::ContainerNotFound(container.to_string()));
    }
    let lines = lines.unwrap_or(DEFAULT_TAIL_LINES);
    let runtime_name = spec.config().runtime_name(container);
    let mut output = call_runtime(&ctx.retry, "logs", || ctx.runtime.logs(&runtime_name, lines)).await?;
    // The runtime may hand back more than asked for.
    if output.len() > lines {
        output.drain(..output.len() - lines);
    }
    Ok(output)
}

/// Copy a host file or directory into a running container.
pub async fn copy(
    ctx: &Context,
    spec: &FormationSpec,
    source: &Path,
    container: &str,
    dest: &str,
) -> Result<()> {
    if !spec.contains(container) {
        return Err(Error::ContainerNotFound(container.to_string()));
    }
    if !source.exists() {
        return Err(Error::Config(format!(
            "Source path '{}' does not exist",
            source.display()
        )));
    }
    let runtime_name = spec.config().runtime_name(container);
    let running = call_runtime(&ctx.retry, "inspect container", || {
        ctx.runtime.inspect_container(&runtime_name)
    })
    .await?
    .is_some_and(|c| c.running);
    if !running {
        return Err(Error::Config(format!(
            "'{}' is not running; start it with `bay start {}`",
            container, container
        )));
    }
    call_runtime(&ctx.retry, "copy", || {
        ctx.runtime.copy_into(&runtime_name, source, dest)
    })
    .await
}

/// Split a `CONTAINER:PATH` argument.
pub fn parse_copy_target(target: &str) -> Result<(&str, &str)> {
    match target.split_once(':') {
        Some((container, path)) if !container.is_empty() && !path.is_empty() => {
            Ok((container, path))
        }
        _ => Err(Error::Config(format!(
            "Invalid copy target '{}': expected CONTAINER:PATH",
            target
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_target() {
        assert_eq!(parse_copy_target("web:/srv/app").unwrap(), ("web", "/srv/app"));
        assert!(parse_copy_target("web").is_err());
        assert!(parse_copy_target(":/srv").is_err());
        assert!(parse_copy_target("web:").is_err());
    }
}
