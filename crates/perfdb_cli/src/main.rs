//! perfdb CLI
//!
//! Maintenance tools for perfdb record stores.
//!
//! # Commands
//!
//! - `inspect` - List tables and record counts
//! - `dump` - Print the records of one table
//! - `verify` - Check referential integrity against a schema file
//! - `purge` - Empty a table

mod commands;

use clap::{Parser, Subcommand};
use perfdb_core::{BackendConfig, BackendKind, Config, StorageLevel};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// perfdb command-line record store tools.
#[derive(Parser)]
#[command(name = "perfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage root directory (overrides --level)
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Storage level whose root to use
    #[arg(global = true, short, long, default_value = "project")]
    level: StorageLevel,

    /// Backend stored in the root (json, sqlite)
    #[arg(global = true, short, long, default_value = "json")]
    backend: BackendKind,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tables and record counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of one table
    Dump {
        /// Table to print
        #[arg(short, long)]
        table: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check referential integrity against a schema file
    Verify {
        /// JSON file holding the list of model schemas
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Remove every record from a table
    Purge {
        /// Table to empty
        #[arg(short, long)]
        table: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let root = cli.root.unwrap_or_else(|| cli.level.default_root());
    let config = Config::new()
        .backend(BackendConfig::on_disk(cli.backend, root))
        .create_if_missing(false);

    match cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(config, &format)?;
        }
        Commands::Dump { table, format } => {
            commands::dump::run(config, &table, &format)?;
        }
        Commands::Verify { schema } => {
            commands::verify::run(config, &schema)?;
        }
        Commands::Purge { table } => {
            commands::purge::run(config, &table)?;
        }
        Commands::Version => {
            println!("perfdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("perfdb Core v{}", perfdb_core::VERSION);
        }
    }

    Ok(())
}
