//! drivesync CLI
//!
//! Operator tools for drivesync stores and servers.
//!
//! # Commands
//!
//! - `token` - Mint a signed credential token
//! - `verify-token` - Show the identity a token carries
//! - `status` - List unsynced nodes of an on-disk store
//! - `write` / `rm` / `mv` - Tracked mutations on an on-disk store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// drivesync command-line tools.
#[derive(Parser)]
#[command(name = "drivesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Mint a signed credential token (printed as hex)
    Token {
        /// Server auth secret
        #[arg(short, long)]
        secret: String,

        /// User identity to bind
        #[arg(short, long)]
        user: String,

        /// Token lifetime in hours
        #[arg(short, long, default_value = "24")]
        expiry_hours: u64,
    },

    /// Show the identity a hex token carries
    VerifyToken {
        /// Server auth secret
        #[arg(short, long)]
        secret: String,

        /// Hex-encoded token
        token: String,

        /// Token lifetime in hours
        #[arg(short, long, default_value = "24")]
        expiry_hours: u64,
    },

    /// List unsynced nodes
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a file and mark it unsynced
    Write {
        /// Node path, e.g. /notes.txt
        file: String,

        /// File content
        content: String,
    },

    /// Delete a file, leaving an unsynced tombstone
    Rm {
        /// Node path
        file: String,
    },

    /// Rename a file, marking both paths unsynced
    Mv {
        /// Source node path
        from: String,

        /// Destination node path
        to: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Token {
            secret,
            user,
            expiry_hours,
        } => commands::token::mint(&secret, &user, expiry_hours)?,
        Commands::VerifyToken {
            secret,
            token,
            expiry_hours,
        } => commands::token::verify(&secret, &token, expiry_hours)?,
        Commands::Status { format } => {
            let path = cli.path.ok_or("Store path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Write { file, content } => {
            let path = cli.path.ok_or("Store path required for write")?;
            commands::write::write(&path, &file, &content)?;
        }
        Commands::Rm { file } => {
            let path = cli.path.ok_or("Store path required for rm")?;
            commands::write::remove(&path, &file)?;
        }
        Commands::Mv { from, to } => {
            let path = cli.path.ok_or("Store path required for mv")?;
            commands::write::rename(&path, &from, &to)?;
        }
        Commands::Version => {
            println!("drivesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
