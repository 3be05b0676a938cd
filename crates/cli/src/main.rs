//! Cartkeeper CLI - Database migrations and maintenance tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! ck-cli migrate
//!
//! # Load demo clients and products
//! ck-cli seed
//! ck-cli seed --file fixtures.yaml
//!
//! # Deliver pending outbox events once, then exit
//! ck-cli outbox drain --limit 100
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Upsert clients and products from a YAML file
//! - `outbox drain` - One-shot delivery of pending outbox events

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ck-cli")]
#[command(author, version, about = "Cartkeeper CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed clients and products
    Seed {
        /// YAML file to load (defaults to the bundled demo data)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Outbox maintenance
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
}

#[derive(Subcommand)]
enum OutboxAction {
    /// Deliver pending events to the log channel, then exit
    Drain {
        /// Stop after this many events
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::run(file.as_deref()).await?,
        Commands::Outbox { action } => match action {
            OutboxAction::Drain { limit } => commands::outbox::drain(limit).await?,
        },
    }
    Ok(())
}
