//! Strobe - an on-demand module dev server core.

#![allow(dead_code)]

mod cli;
mod config;
mod graph;
mod hmr;
mod logger;
mod optimizer;
mod server;
mod utils;
mod watch;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::StrobeConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = config::init_config(StrobeConfig::load(&cli)?);

    match &cli.command {
        Commands::Serve { .. } => cli::serve::run(config),
        Commands::Optimize { force } => cli::optimize::run(config, *force),
        Commands::Clean => {
            let cache_dir = config.cache_dir();
            optimizer::store::clear_cache(&cache_dir)?;
            log!("optimize"; "removed {}", cache_dir.display());
            Ok(())
        }
    }
}
