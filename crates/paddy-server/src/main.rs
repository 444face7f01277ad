//! Offline tooling for Paddy saves and content.
//!
//! # Usage
//!
//! ```bash
//! # Check a content directory for validation issues
//! cargo run -p paddy-server -- validate --content data/
//!
//! # Verify a save envelope and print its summary
//! cargo run -p paddy-server -- verify --save save.json
//!
//! # Recompute what a save earns while away
//! cargo run -p paddy-server -- offline --content data/ --save save.json --now 1700000000000
//! ```
//!
//! Results go to stdout as JSON. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paddy_server::commands;

#[derive(Parser)]
#[command(name = "paddy-server")]
#[command(about = "Save verification and offline recomputation for Paddy")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a content directory and report validation issues
    Validate {
        /// Directory holding the content files
        #[arg(short, long)]
        content: PathBuf,
    },

    /// Verify a save envelope's checksum and decode it
    Verify {
        /// Save envelope (JSON)
        #[arg(short, long)]
        save: PathBuf,
    },

    /// Recompute offline progress for a save
    Offline {
        /// Directory holding the content files
        #[arg(short, long)]
        content: PathBuf,

        /// Engine config file (TOML, RON or JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Save envelope (JSON)
        #[arg(short, long)]
        save: PathBuf,

        /// Server clock, epoch milliseconds
        #[arg(long)]
        now: u64,

        /// Start of the absence; defaults to the save's last played time
        #[arg(long)]
        since: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    let result = match cli.command {
        Commands::Validate { content } => commands::validate(&content),
        Commands::Verify { save } => commands::verify(&save),
        Commands::Offline {
            content,
            config,
            save,
            now,
            since,
        } => commands::offline(&content, config.as_deref(), &save, now, since),
    };

    match result {
        Ok(report) => {
            print_json(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}
