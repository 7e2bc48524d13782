mod cache;
mod cli;
mod commands;
mod config;
mod engine;
mod glue;
mod logging;
mod notebook;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Build(args) => commands::build::run(&args),
        Commands::Cache(args) => commands::cache::run(&args),
    }
}
