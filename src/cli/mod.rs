//! CLI Module
//!
//! Command-line interface for inspecting and editing fxroute projects.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// fxroute - effect chain and signal routing tool
#[derive(Parser, Debug)]
#[command(name = "fxroute")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Which strip a command targets
#[derive(Args, Debug, Clone, Copy)]
#[group(required = true, multiple = false)]
pub struct StripTarget {
    /// Track index
    #[arg(long)]
    pub track: Option<u32>,

    /// The master bus
    #[arg(long)]
    pub master: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available effect types and their parameters
    #[command(name = "effects")]
    Effects,

    /// Print every strip's chain and live topology
    #[command(name = "inspect")]
    Inspect {
        /// Path to the project file
        project: PathBuf,
    },

    /// Add an effect to a strip and save the project
    #[command(name = "add-effect")]
    AddEffect {
        /// Path to the project file (created if missing)
        project: PathBuf,

        #[command(flatten)]
        target: StripTarget,

        /// Effect type (e.g. Reverb)
        #[arg(short = 't', long = "type")]
        effect_type: String,

        /// Parameter override as path=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Render a test tone through every track into a WAV file
    #[command(name = "render")]
    Render {
        /// Path to the project file
        project: PathBuf,

        /// Length of the render in seconds
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f32,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },
}
