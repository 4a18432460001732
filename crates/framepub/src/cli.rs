//! Command-line interface definitions for framepub.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use logging::LogArgs;

/// Command-line interface for the `framepub` binary.
#[derive(Parser, Debug)]
#[command(
    name = "framepub",
    about = "Throttled live-preview pipeline harness",
    version
)]
pub struct Cli {
    /// Logging controls shared across binaries.
    #[command(flatten)]
    pub log: LogArgs,

    /// What to do.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synthetic capture source through the publisher into a main-thread display.
    Run(RunArgs),
    /// Print the effective configuration in RON syntax.
    Config(ConfigArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Optional path to a harness configuration file (RON).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Minimum gap between two published frames.
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub min_interval: Option<Duration>,

    /// Capture rate of the synthetic source, in frames per second.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// How long the capture source runs before shutting down.
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub duration: Option<Duration>,

    /// Size of each synthetic frame payload in bytes.
    #[arg(long, value_name = "BYTES")]
    pub frame_bytes: Option<usize>,
}

/// Arguments for the `config` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Optional configuration file to load before printing.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
