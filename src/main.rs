mod cli;
mod commands;
mod output;

use bay::orchestrator::{BootOptions, BuildOptions};
use bay::Error as BayError;
use clap::Parser;
use cli::{Cli, Commands, VolumeCommands};
use commands::Formation;
use output::{CliOutput, QuietOutput, UserOutput};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(bay_error) = e.downcast_ref::<BayError>() {
            eprintln!("Error: {}", bay_error);
            if let Some(suggestion) = bay_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let out: &dyn UserOutput = if cli.quiet { &QuietOutput } else { &CliOutput };
    let config = commands::load_config(cli.config.clone())?;
    let profile = cli.profile.as_deref();

    // ── Commands that only read the config ─────────────────────────
    match &cli.command {
        Commands::Profile { name } => {
            return commands::run_profile(&config, profile, name.clone(), out);
        }
        Commands::Profiles { verbose } => {
            return commands::run_profiles(&config, profile, *verbose, out);
        }
        _ => {}
    }

    // ── Commands that need the resolved formation ──────────────────
    let formation = Formation::load(config, profile, out)?;
    formation.cancel_on_ctrl_c();

    match cli.command {
        Commands::Build {
            containers,
            no_cache,
            one,
            force,
        } => {
            let options = BuildOptions {
                force,
                recursive: !one,
                no_cache,
                ..BuildOptions::default()
            };
            commands::run_build(&formation, containers, options, out).await
        }
        Commands::Up {
            include_system,
            restart,
        } => {
            let options = BootOptions {
                include_system,
                restart: restart.into_iter().collect(),
            };
            commands::run_up(&formation, options, out).await
        }
        Commands::Start { containers } => commands::run_start(&formation, containers, out).await,
        Commands::Stop {
            containers,
            include_system,
        } => commands::run_stop(&formation, containers, include_system, out).await,
        Commands::Tail { container, lines } => {
            commands::run_tail(&formation, &container, lines, out).await
        }
        Commands::Volume(VolumeCommands::List) => commands::run_volume_list(&formation, out).await,
        Commands::Volume(VolumeCommands::Destroy { name }) => {
            commands::run_volume_destroy(&formation, &name, out).await
        }
        Commands::Mounts => commands::run_mounts(&formation, out).await,
        Commands::Copy { source, target } => {
            commands::run_copy(&formation, &source, &target, out).await
        }
        Commands::Push { containers } => commands::run_push(&formation, containers, out).await,
        Commands::Graph => commands::run_graph(&formation, out),
        Commands::Profile { .. } | Commands::Profiles { .. } => Ok(()),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
