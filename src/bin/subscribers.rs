//! Manage the daily-alert subscriber list from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use market_sentiment_terminal::subscribers::SubscriberStore;
use market_sentiment_terminal::{init_tracing, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "subscribers")]
#[command(about = "Daily alert subscriber management")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Subscribe an address.
    Add { email: String },
    /// Remove an address.
    Remove { email: String },
    /// Print active addresses.
    List,
    /// Print counts and timestamps as JSON.
    Stats,
    /// Write a timestamped copy of the subscriber file.
    Backup,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("warn");
    let cli = Cli::parse();
    let cfg = AppConfig::load_default()?;
    let store = SubscriberStore::new(cfg.paths.subscribers_file());

    match cli.command {
        Commands::Add { email } => match store.add(Some(&email), Some("cli")) {
            Ok(msg) => println!("{msg}"),
            Err(e) => anyhow::bail!("{e}"),
        },
        Commands::Remove { email } => match store.remove(Some(&email)) {
            Ok(msg) => println!("{msg}"),
            Err(e) => anyhow::bail!("{e}"),
        },
        Commands::List => {
            let active = store.active();
            println!("Active subscribers ({}):", active.len());
            for email in active {
                println!("  {email}");
            }
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
        Commands::Backup => {
            let path = store.backup()?;
            println!("Backup created: {}", path.display());
        }
    }
    Ok(())
}
