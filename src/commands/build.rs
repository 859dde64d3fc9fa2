use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::{BuildOptions, BuildOrchestrator};
use bay::Error;

pub async fn run_build(
    formation: &Formation,
    containers: Vec<String>,
    options: BuildOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let targets = if containers.is_empty() {
        formation.spec.default_build_set()
    } else {
        containers
    };

    if targets.is_empty() {
        out.status("No containers to build");
        return Ok(());
    }

    let builder = BuildOrchestrator::new(&formation.ctx, &formation.spec, &formation.graph);
    let plan = builder.plan(&targets, options).await?;

    for name in &plan.to_build() {
        if let Some(reason) = plan.reason(name) {
            out.status(&format!("  {} ({})", name, reason));
        }
    }

    match builder.execute(&plan, options).await {
        Ok(report) => {
            for name in &report.pulled {
                out.status(&format!("Pulled {}", name));
            }
            out.success(&format!(
                "Built {} image(s) in {:.1}s ({} up to date)",
                report.built.len(),
                report.elapsed.as_secs_f64(),
                report.up_to_date.len()
            ));
            Ok(())
        }
        Err(e) => {
            print_build_failures(&e, out);
            Err(e.into())
        }
    }
}

fn print_build_failures(err: &Error, out: &dyn UserOutput) {
    match err {
        Error::Multiple(errors) => errors.iter().for_each(|e| print_build_failures(e, out)),
        Error::Build {
            container,
            log_tail,
            ..
        } if !log_tail.is_empty() => {
            out.error(&format!("Last output of '{}':", container));
            for line in log_tail {
                out.error(&format!("    {}", line));
            }
        }
        _ => {}
    }
}
