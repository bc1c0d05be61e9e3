//! Journal CLI
//!
//! Command-line tools for running and maintaining a journal sync server.
//!
//! # Commands
//!
//! - `serve` - Serve the sync and entries endpoints over HTTP
//! - `inspect` - Display store statistics, global hash and manifest
//! - `restore` - Move a soft-deleted entry back out of the trash

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Journal sync server tools.
#[derive(Parser)]
#[command(name = "journal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server data directory
    #[arg(global = true, short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP endpoints until Ctrl-C
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Accepted bearer token, as a SHA-256 hex digest (repeatable).
        /// Without any, every request is accepted.
        #[arg(long = "token-digest")]
        token_digests: Vec<String>,

        /// Maximum number of items in one batch
        #[arg(long, default_value = "5000")]
        max_batch_items: usize,
    },

    /// Display store statistics, global hash and manifest
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Restore a soft-deleted entry
    Restore {
        /// Entry id
        id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            token_digests,
            max_batch_items,
        } => {
            commands::serve::run(&cli.data_dir, bind, token_digests, max_batch_items)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&cli.data_dir, &format)?;
        }
        Commands::Restore { id } => {
            commands::restore::run(&cli.data_dir, &id)?;
        }
    }

    Ok(())
}
