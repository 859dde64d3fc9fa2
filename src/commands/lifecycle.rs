use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::{BootAction, BootOptions, BootOrchestrator, BootReport};

pub async fn run_up(
    formation: &Formation,
    options: BootOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let boot = BootOrchestrator::new(&formation.ctx, &formation.spec, &formation.graph);
    match formation.spec.active_profile() {
        Some(profile) => out.status(&format!("Booting profile '{}'...", profile)),
        None => out.status("Booting formation..."),
    }
    let report = boot.up(&options).await?;
    for name in &report.pruned {
        out.status(&format!("  stopped {}", name));
    }
    print_report(&report, out);
    out.success("Formation is up");
    Ok(())
}

pub async fn run_start(
    formation: &Formation,
    containers: Vec<String>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let boot = BootOrchestrator::new(&formation.ctx, &formation.spec, &formation.graph);
    let report = boot.start(&containers, &BootOptions::default()).await?;
    print_report(&report, out);
    out.success(&format!("Started {}", containers.join(", ")));
    Ok(())
}

pub async fn run_stop(
    formation: &Formation,
    containers: Vec<String>,
    include_system: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let boot = BootOrchestrator::new(&formation.ctx, &formation.spec, &formation.graph);
    let stopped = boot.stop(&containers, include_system).await?;
    if stopped.is_empty() {
        out.status("Nothing to stop");
    } else {
        out.success(&format!("Stopped {}", stopped.join(", ")));
    }
    Ok(())
}

fn print_report(report: &BootReport, out: &dyn UserOutput) {
    for (name, action) in &report.actions {
        let verb = match action {
            BootAction::Started => "started",
            BootAction::Restarted => "restarted",
            BootAction::AlreadyRunning => "running",
        };
        out.status(&format!("  {:<20} {}", name, verb));
    }
    for warning in &report.warnings {
        out.warning(&warning.message);
    }
}
