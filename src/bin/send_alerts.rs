//! Daily alert email: preview to files, send a test, or send to all subscribers.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use market_sentiment_terminal::notify::{self, content, email, EmailSender};
use market_sentiment_terminal::{init_tracing, AppConfig};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "send-alerts")]
#[command(about = "Render and deliver the daily market sentiment email")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render today's email into `email_preview.html` / `email_preview.txt`.
    Preview {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Send today's email (or the SMTP check message) to one address.
    Test {
        email: String,
        /// Send the fixed SMTP check message instead of today's report.
        #[arg(long)]
        smtp_check: bool,
    },
    /// Send today's email to every active subscriber.
    Send,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info");
    let cli = Cli::parse();
    let cfg = AppConfig::load_default()?;

    match cli.command {
        Commands::Preview { out_dir } => {
            let c = content::generate(&cfg)?;
            std::fs::create_dir_all(&out_dir)?;
            std::fs::write(out_dir.join("email_preview.html"), &c.html)?;
            std::fs::write(out_dir.join("email_preview.txt"), &c.text)?;
            println!("Email preview generated in {}", out_dir.display());
            println!("Subject: {}", c.subject);
        }
        Commands::Test { email: to, smtp_check } => {
            let issues = email::config_issues(&cfg.email);
            if !issues.is_empty() {
                bail!("email configuration issues: {}", issues.join("; "));
            }
            let c = if smtp_check { email::test_content() } else { content::generate(&cfg)? };
            let sender = EmailSender::from_config(&cfg.email)?;
            let report = email::send_to_all(&sender, &[to.clone()], &c).await;
            if report.failed > 0 {
                bail!("failed to send test email to {to}");
            }
            println!("Test email sent to {to} (subject: {})", c.subject);
        }
        Commands::Send => {
            cfg.validate_production()?;
            let sender = EmailSender::from_config(&cfg.email)?;
            let report = notify::send_daily_alerts(&cfg, &sender).await?;
            println!("daily alerts: sent={} failed={}", report.sent, report.failed);
            if report.failed > 0 && report.sent == 0 {
                bail!("every delivery failed");
            }
        }
    }
    Ok(())
}
