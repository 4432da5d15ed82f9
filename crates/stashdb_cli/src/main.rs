//! StashDB CLI
//!
//! Command-line tools for StashDB.
//!
//! # Commands
//!
//! - `check` - Run the conformance scenarios
//! - `estimate` - Print the storage estimate of a factory directory
//! - `inspect` - List databases, stores and journal sizes
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// StashDB command-line tools.
#[derive(Parser)]
#[command(name = "stashdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the factory directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance scenarios
    Check {
        /// Only run this suite
        #[arg(short, long)]
        suite: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the storage estimate of a factory directory
    Estimate {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List databases, stores and journal sizes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { suite, format } => {
            commands::check::run(suite.as_deref(), cli.path.as_deref(), &format)?;
        }
        Commands::Estimate { format } => {
            let path = cli.path.ok_or("Factory path required for estimate")?;
            commands::estimate::run(&path, &format)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Factory path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Version => {
            println!("StashDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("StashDB Core v{}", stashdb_core::VERSION);
        }
    }

    Ok(())
}
