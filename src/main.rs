//! strata: headless tile-world streaming simulator and collider merge tool.

mod config;
mod merge;
mod sim;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strata", about = "Tile-world streaming scheduler and collider merge tools")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless streaming simulation from a TOML config
    Run {
        #[arg(default_value = "strata.toml")]
        config: PathBuf,
    },
    /// Merge unit-cube colliders described in a TOML file
    Merge {
        input: PathBuf,
        /// Write TOML output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Run { config } => sim::run(&config),
        Commands::Merge { input, output } => merge::run(&input, output.as_deref()),
    };
    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }
}
