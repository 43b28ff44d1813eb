//! Market Sentiment Terminal: binary entrypoint.
//! Boots the Axum HTTP server with the dashboard, the JSON API and `/metrics`.
//!
//! Caches are produced by the `update-cache` binary; this process only reads them.

use market_sentiment_terminal::{api, init_tracing, metrics::Metrics, ssi, AppConfig, AppState};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing("market_sentiment_terminal=info,api=info,provider=info,warn");

    let cfg = AppConfig::load_default().map_err(shuttle_runtime::Error::Custom)?;
    if let Err(e) = cfg.validate_production() {
        // The dashboard still serves cached data; batch jobs will refuse to run.
        warn!(target: "api", error = %e, "production credentials incomplete");
    }

    let cached = ssi::cached_records(&cfg).len();
    let metrics = Metrics::init(cached).map_err(shuttle_runtime::Error::Custom)?;
    info!(
        target: "api",
        env = %cfg.environment,
        static_dir = %cfg.paths.static_dir.display(),
        ssi_months = cached,
        "starting dashboard server"
    );

    let router = api::router(AppState::new(cfg), &metrics);
    Ok(router.into())
}
