use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::BuildOrchestrator;

pub async fn run_push(
    formation: &Formation,
    containers: Vec<String>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let builder = BuildOrchestrator::new(&formation.ctx, &formation.spec, &formation.graph);
    for image in builder.push(&containers).await? {
        out.status(&format!("  pushed {}", image));
    }
    out.success("Push complete");
    Ok(())
}
