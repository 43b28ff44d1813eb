//! Batch refresh of every cache the dashboard and the daily email read.
//! Run on a schedule (one run at a time; no file locking).

use anyhow::Result;
use clap::Parser;
use market_sentiment_terminal::{init_tracing, provider, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "update-cache")]
#[command(about = "Refresh Fear & Greed, AAII, SSI and the overall analysis caches")]
struct Cli {
    /// Skip the SSI search/scrape/extract pipeline (cached SSI is still used).
    #[arg(long)]
    skip_ssi: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info");
    let cli = Cli::parse();

    let cfg = AppConfig::load_default()?;
    cfg.validate_production()?;

    let summary = provider::refresh_all(&cfg, !cli.skip_ssi).await;
    println!(
        "cache update finished: fear_greed={} aaii={} ssi={} added={} recommendation={}",
        if summary.fear_greed { "ok" } else { "failed" },
        if summary.aaii { "ok" } else { "failed" },
        summary.ssi_outcome.as_deref().unwrap_or("skipped"),
        summary.ssi_added,
        summary.recommendation
    );
    Ok(())
}
