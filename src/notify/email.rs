// src/notify/email.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tracing::{error, info};

use super::content::{personalize, EmailContent};
use crate::config::EmailConfig;
use crate::subscribers::email_fingerprint;

pub const TEST_SUBJECT: &str = "Test Email - Market Sentiment Terminal";
const PLACEHOLDER_FROM: &str = "alerts@yourdomain.com";

/// Something that can deliver one rendered email to one recipient.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, to: &str, content: &EmailContent) -> Result<()>;
}

/// Problems that would make SMTP delivery fail; empty when ready.
pub fn config_issues(cfg: &EmailConfig) -> Vec<String> {
    let mut issues = Vec::new();
    if cfg.smtp_host.as_deref().map_or(true, |h| h.trim().is_empty()) {
        issues.push("SMTP_HOST not set in environment variables".to_string());
    }
    if cfg.from_email.trim().is_empty() || cfg.from_email == PLACEHOLDER_FROM {
        issues.push("FROM_EMAIL not properly configured".to_string());
    }
    issues
}

pub fn build_message(from: &Mailbox, to: &str, content: &EmailContent) -> Result<Message> {
    let to: Mailbox = to.parse().with_context(|| format!("invalid recipient {}", email_fingerprint(to)))?;
    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(content.subject.clone())
        .multipart(MultiPart::alternative_plain_html(
            content.text.clone(),
            content.html.clone(),
        ))
        .context("build email")
}

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let host = cfg
            .smtp_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| anyhow!("SMTP_HOST missing"))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host).context("invalid SMTP_HOST")?;
        if let (Some(user), Some(pass)) = (&cfg.smtp_user, &cfg.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = Mailbox::new(
            Some(cfg.from_name.clone()),
            cfg.from_email.parse().context("invalid FROM_EMAIL")?,
        );
        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for EmailSender {
    async fn deliver(&self, to: &str, content: &EmailContent) -> Result<()> {
        let msg = build_message(&self.from, to, content)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send to every recipient in turn, each with their own unsubscribe link.
/// One failure does not stop the rest.
pub async fn send_to_all(
    transport: &dyn MailTransport,
    recipients: &[String],
    content: &EmailContent,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for to in recipients {
        match transport.deliver(to, &personalize(content, to)).await {
            Ok(()) => {
                report.sent += 1;
                info!(target: "notify", who = %email_fingerprint(to), "alert sent");
            }
            Err(e) => {
                report.failed += 1;
                error!(target: "notify", who = %email_fingerprint(to), error = ?e, "alert failed");
            }
        }
    }
    report
}

/// Fixed message used to check SMTP settings end to end.
pub fn test_content() -> EmailContent {
    EmailContent {
        subject: TEST_SUBJECT.to_string(),
        html: "<h1>MARKET SENTIMENT TERMINAL</h1>\
<p>Email service is working correctly.</p>\
<p>If you received this email, the service is ready to send daily market sentiment alerts.</p>"
            .to_string(),
        text: "MARKET SENTIMENT TERMINAL - Email Service Test\n\n\
Email service is working correctly.\n\
If you received this email, the service is ready to send daily market sentiment alerts.\n"
            .to_string(),
        variables: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Outbox {
        reject: &'static str,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for Outbox {
        async fn deliver(&self, to: &str, _content: &EmailContent) -> Result<()> {
            if to == self.reject {
                return Err(anyhow!("mailbox unavailable"));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let outbox = Outbox {
            reject: "bad@x.com",
            sent: Mutex::new(Vec::new()),
        };
        let to = vec!["a@x.com".to_string(), "bad@x.com".to_string(), "c@x.com".to_string()];
        let report = send_to_all(&outbox, &to, &test_content()).await;
        assert_eq!(report, DeliveryReport { sent: 2, failed: 1 });
        assert_eq!(*outbox.sent.lock().unwrap(), vec!["a@x.com", "c@x.com"]);
    }

    #[test]
    fn message_is_multipart_alternative() {
        let from: Mailbox = "Terminal <alerts@example.com>".parse().unwrap();
        let msg = build_message(&from, "reader@example.com", &test_content()).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: Test Email - Market Sentiment Terminal"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
        assert!(build_message(&from, "not an address", &test_content()).is_err());
    }

    #[test]
    fn config_issues_flag_defaults() {
        let cfg = EmailConfig::default();
        assert_eq!(config_issues(&cfg).len(), 2);
        let ready = EmailConfig {
            smtp_host: Some("smtp.example.com".into()),
            from_email: "alerts@example.com".into(),
            ..EmailConfig::default()
        };
        assert!(config_issues(&ready).is_empty());
        assert!(EmailSender::from_config(&cfg).is_err());
    }
}
