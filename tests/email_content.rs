// tests/email_content.rs
//
// Renders the real templates from email_templates/ against fixture caches and
// delivers through an in-memory transport.

mod common;

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use market_sentiment_terminal::notify::{self, content, EmailContent, MailTransport};
use market_sentiment_terminal::ssi::{Confidence, MonthlyCache, MonthlyIndicatorRecord};
use market_sentiment_terminal::subscribers::SubscriberStore;

fn seed_ssi(cfg: &market_sentiment_terminal::AppConfig) {
    let mut cache = MonthlyCache::load(cfg.paths.ssi_cache());
    let records = [("2025-01", 53.1), ("2025-02", 54.2), ("2025-03", 55.7), ("2024-12", 52.9), ("2024-11", 51.0)]
        .into_iter()
        .map(|(date, level)| MonthlyIndicatorRecord {
            level,
            date: date.into(),
            source_url: "https://example.com".into(),
            confidence: Confidence::High,
            context: "ctx".into(),
            reasoning: String::new(),
            source: None,
            updated_at: None,
        })
        .collect();
    cache.update(records);
    cache.save().unwrap();
}

#[test]
fn renders_templates_from_caches() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config_in(dir.path());
    common::write_fng(&cfg);
    common::write_aaii(&cfg);
    seed_ssi(&cfg);

    let email = content::generate(&cfg).unwrap();
    assert!(email.subject.starts_with("Daily Market Sentiment Report "));
    assert!(email.subject.ends_with(" - HOLD Signal"));

    assert_eq!(email.variables["fng_score"], "38");
    assert_eq!(email.variables["fng_class"], "fear");
    assert_eq!(email.variables["aaii_spread"], "-4.7");
    assert_eq!(email.variables["ssi_latest_month"], "2025-03");
    assert_eq!(
        email.variables["ssi_history_text"],
        "2025-03: 55.7%\n2025-02: 54.2%\n2025-01: 53.1%\n2024-12: 52.9%"
    );

    assert!(!email.html.contains("{{"), "unrendered placeholder in html");
    assert!(!email.text.contains("{{"), "unrendered placeholder in text");
    assert!(email.html.contains("<div class=\"ssi-row\">"));
    assert!(email.text.contains("CNN FEAR & GREED: 38 (fear)"));
    assert!(email.text.contains("Unsubscribe: https://dash.example.com/unsubscribe"));
}

#[test]
fn generation_fails_without_fear_greed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config_in(dir.path());
    common::write_aaii(&cfg);
    let err = content::generate(&cfg).unwrap_err();
    assert!(err.to_string().starts_with("Fear & Greed data error"));
}

struct Outbox(Mutex<Vec<(String, EmailContent)>>);

#[async_trait]
impl MailTransport for Outbox {
    async fn deliver(&self, to: &str, content: &EmailContent) -> Result<()> {
        self.0.lock().unwrap().push((to.to_string(), content.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn daily_alerts_go_to_active_subscribers_with_own_link() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config_in(dir.path());
    common::write_fng(&cfg);
    common::write_aaii(&cfg);

    let store = SubscriberStore::new(cfg.paths.subscribers_file());
    store.add(Some("a@example.com"), None).unwrap();
    store.add(Some("b@example.com"), None).unwrap();

    let outbox = Outbox(Mutex::new(Vec::new()));
    let report = notify::send_daily_alerts(&cfg, &outbox).await.unwrap();
    assert_eq!((report.sent, report.failed), (2, 0));

    let sent = outbox.0.lock().unwrap();
    assert_eq!(sent[0].0, "a@example.com");
    assert!(sent[0].1.text.contains("/unsubscribe?email=a%40example.com"));
    assert!(sent[1].1.html.contains("/unsubscribe?email=b%40example.com"));
}

#[tokio::test]
async fn no_subscribers_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = common::config_in(dir.path());
    common::write_fng(&cfg);
    common::write_aaii(&cfg);

    let outbox = Outbox(Mutex::new(Vec::new()));
    let report = notify::send_daily_alerts(&cfg, &outbox).await.unwrap();
    assert_eq!((report.sent, report.failed), (0, 0));
    assert!(outbox.0.lock().unwrap().is_empty());
}
