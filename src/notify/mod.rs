// src/notify/mod.rs
//! Daily alert email: content from the caches, delivery over SMTP.

pub mod content;
pub mod email;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::subscribers::SubscriberStore;

pub use content::EmailContent;
pub use email::{DeliveryReport, EmailSender, MailTransport};

/// Render today's alert and send it to every active subscriber.
pub async fn send_daily_alerts(cfg: &AppConfig, transport: &dyn MailTransport) -> Result<DeliveryReport> {
    let content = content::generate(cfg)?;
    let recipients = SubscriberStore::new(cfg.paths.subscribers_file()).active();
    if recipients.is_empty() {
        warn!(target: "notify", "no active subscribers, nothing sent");
        return Ok(DeliveryReport::default());
    }
    info!(target: "notify", recipients = recipients.len(), subject = %content.subject, "sending daily alerts");
    let report = email::send_to_all(transport, &recipients, &content).await;
    info!(target: "notify", sent = report.sent, failed = report.failed, "daily alerts finished");
    Ok(report)
}
