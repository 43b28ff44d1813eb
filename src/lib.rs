// src/lib.rs
// Public library surface shared by the server, the batch binaries and the integration tests.

pub mod api;
pub mod config;
pub mod indicators;
pub mod llm;
pub mod metrics;
pub mod notify;
pub mod pacing;
pub mod provider;
pub mod ssi;
pub mod subscribers;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. `LOG_FORMAT=json` switches to
/// one JSON object per line (for the hosted runtime); otherwise compact
/// text. Safe to call more than once: later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
