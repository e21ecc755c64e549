//! fxroute CLI
//!
//! Command-line interface for the fxroute effect routing engine.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use fxroute::cli::commands;
use fxroute::cli::{Cli, Commands};
use fxroute::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("fxroute v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    debug!("engine config: {:?}", config);

    match cli.command {
        Some(cmd) => handle_command(cmd, &config),
        None => {
            println!("fxroute v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: &EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Effects => commands::list_effects(config),
        Commands::Inspect { project } => commands::inspect(&project, config),
        Commands::AddEffect {
            project,
            target,
            effect_type,
            params,
        } => commands::add_effect(&project, config, target, &effect_type, &params),
        Commands::Render {
            project,
            seconds,
            output,
        } => commands::render(&project, config, seconds, &output),
    }
}
