#![warn(missing_docs)]

//! Entry point for the `framepub` binary.

mod cli;
mod config;
mod error;
mod format;
mod harness;

use std::process;

use clap::Parser;
use tracing::{error, info};

use crate::{
    cli::{Cli, Commands},
    config::HarnessConfig,
    error::Result,
};

fn main() {
    if let Err(err) = run() {
        error!("{err}");
        eprintln!("error: {err}");
        process::exit(1);
    }
}

/// Parse CLI arguments, install logging, and dispatch to the chosen subcommand.
fn run() -> Result<()> {
    let Cli { log, command } = Cli::parse();
    logging::init(&log.spec());

    match command {
        Commands::Run(args) => {
            let mut config = HarnessConfig::load_or_default(args.config.as_deref())?;
            config.apply(&args);
            info!(?config, "harness_config");
            let summary = harness::run(&config)?;
            println!("{summary}");
            Ok(())
        }
        Commands::Config(args) => {
            let config = HarnessConfig::load_or_default(args.config.as_deref())?;
            println!("{}", config.to_ron()?);
            Ok(())
        }
    }
}
