use std::path::PathBuf;

use clap::{Parser, Subcommand};
use migrant_deploy::Release;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "migrant")]
#[command(
    author,
    version,
    about = "Deploy, upgrade and wire the KGR protocol modules, one resumable step at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "MIGRANT_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the settings file.
    #[arg(short, long, env = "MIGRANT_SETTINGS", default_value = "Migrant.toml", global = true)]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a release against a network, resuming where a previous run stopped.
    Migrate {
        /// The network to deploy to.
        #[arg(short, long, env = "MIGRANT_NETWORK", default_value = "development")]
        network: String,

        /// The release to run.
        #[arg(short, long, default_value_t = Release::All)]
        release: Release,
    },

    /// Print the steps of a release for a network without running them.
    Plan {
        /// The network whose deployment config expands the release.
        #[arg(short, long, env = "MIGRANT_NETWORK", default_value = "development")]
        network: String,

        /// The release to print.
        #[arg(short, long, default_value_t = Release::All)]
        release: Release,
    },

    /// Show the registry entries of a network.
    Registry {
        /// The network to inspect.
        #[arg(short, long, env = "MIGRANT_NETWORK", default_value = "development")]
        network: String,
    },
}
