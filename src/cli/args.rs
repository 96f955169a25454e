//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Strobe dev server CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (default: strobe.toml, searched upward from cwd)
    #[arg(short = 'C', long, default_value = "strobe.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the development server with hot module replacement
    #[command(visible_alias = "s")]
    Serve {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<std::net::IpAddr>,

        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable file watching for hot updates
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },

    /// Pre-bundle dependencies now and print a summary
    #[command(visible_alias = "o")]
    Optimize {
        /// Discard the existing cache first
        #[arg(short, long)]
        force: bool,
    },

    /// Remove the dependency cache directory
    Clean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["strobe", "serve", "--port", "4000"]).unwrap();
        match cli.command {
            Commands::Serve { port, .. } => assert_eq!(port, Some(4000)),
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn test_parse_optimize_force() {
        let cli = Cli::try_parse_from(["strobe", "optimize", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Optimize { force: true }));
    }

    #[test]
    fn test_verbose_global() {
        let cli = Cli::try_parse_from(["strobe", "clean", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Clean));
    }
}
