use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::{copy, parse_copy_target};
use std::path::Path;

pub async fn run_copy(
    formation: &Formation,
    source: &Path,
    target: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let (container, dest) = parse_copy_target(target)?;
    copy(&formation.ctx, &formation.spec, source, container, dest).await?;
    out.success(&format!(
        "Copied {} to {}:{}",
        source.display(),
        container,
        dest
    ));
    Ok(())
}
