use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bay")]
#[command(version)]
#[command(about = "Bay - Build and boot multi-container development formations")]
pub struct Cli {
    /// Config file path (defaults to bay.yaml, searched upwards)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Profile to use instead of the saved one
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Print errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build container images, along with their build dependencies
    Build {
        /// Containers to build (defaults to the profile's containers, system
        /// containers and volume providers)
        containers: Vec<String>,

        /// Build without the image cache
        #[arg(long)]
        no_cache: bool,

        /// Build only the named containers, not their dependencies
        #[arg(long)]
        one: bool,

        /// Rebuild the named containers even when unchanged
        #[arg(long)]
        force: bool,
    },
    /// Boot the profile's default containers and stop the rest
    Up {
        /// Also boot system containers that are not dependencies
        #[arg(long)]
        include_system: bool,

        /// Restart these containers even if unchanged (can be repeated)
        #[arg(long, value_name = "NAME")]
        restart: Vec<String>,
    },
    /// Start containers and their dependencies
    Start {
        #[arg(required = true)]
        containers: Vec<String>,
    },
    /// Stop containers and whatever depends on them
    Stop {
        /// Containers to stop (defaults to every non-system container)
        containers: Vec<String>,

        /// Include system containers when stopping everything
        #[arg(long)]
        include_system: bool,
    },
    /// Show the last lines of a container's output
    Tail {
        container: String,

        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,
    },
    /// Volume operations
    #[command(subcommand)]
    Volume(VolumeCommands),
    /// Show every container's volume mounts
    Mounts,
    /// Copy a file or directory into a running container
    Copy {
        source: PathBuf,

        /// Destination as CONTAINER:PATH
        target: String,
    },
    /// Show the active profile chain, or switch to another profile
    Profile { name: Option<String> },
    /// List available profiles
    Profiles {
        /// Include the containers each profile names
        #[arg(short, long)]
        verbose: bool,
    },
    /// Push images to the configured registry
    Push {
        #[arg(required = true)]
        containers: Vec<String>,
    },
    /// Show the dependency graph as parallel boot groups
    Graph,
}

#[derive(Subcommand)]
pub enum VolumeCommands {
    /// List volumes with provider, modes and current users
    List,
    /// Stop the volume's users and remove it
    Destroy { name: String },
}
