use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::tail;

pub async fn run_tail(
    formation: &Formation,
    container: &str,
    lines: usize,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let output = tail(&formation.ctx, &formation.spec, container, Some(lines)).await?;
    for line in output {
        out.status(&line);
    }
    Ok(())
}
